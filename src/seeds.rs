//! Built-in lessons so the service is useful without any config file.

use crate::domain::{ExerciseDefinition, Lesson};

fn explain(title: &str) -> ExerciseDefinition {
  ExerciseDefinition { title: title.into(), interactive: false, ..Default::default() }
}

fn exercise(title: &str, content: &str, answers: &[&str], flags: &str) -> ExerciseDefinition {
  ExerciseDefinition {
    title: title.into(),
    content: content.into(),
    reference_patterns: answers.iter().map(|s| s.to_string()).collect(),
    reference_flags: flags.into(),
    initial_flags: flags.into(),
    interactive: true,
    ..Default::default()
  }
}

/// Introductory lesson covering the first handful of concepts.
pub fn seed_lessons() -> Vec<Lesson> {
  vec![Lesson {
    id: "regex101".into(),
    title: "Regular expressions 101".into(),
    description: "Basic matchers, character sets, quantifiers, anchors and lookarounds.".into(),
    steps: vec![
      explain("What is a regular expression?"),
      exercise("Basic matchers", "I have become so curious about regex.", &["curious"], "g"),
      exercise("Dot", "abc", &["."], "g"),
      exercise("Character sets", "bar ber bir bor bur", &["b[eo]r"], "g"),
      exercise("Negated character sets", "bar ber bir bor bur", &["b[^eo]r"], "g"),
      exercise("Letter ranges", "abcdefghijklmnopqrstuvwxyz", &["[e-o]"], "g"),
      exercise("Number ranges", "0123456789", &["[3-6]"], "g"),
      exercise("Asterisk", "br ber beer", &["be*r"], "g"),
      exercise("Plus", "br ber beer", &["be+r"], "g"),
      ExerciseDefinition {
        initial_value: "[0-9]".into(),
        cursor_position: 0,
        ..exercise("Caret anchor", "Basic Omellette Recipe\n\n1. 3 eggs, beaten\n2. 1 tsp sunflower oil\n3. 1 tsp butter", &["^[0-9]"], "gm")
      },
      ExerciseDefinition {
        use_flags_control: true,
        initial_flags: String::new(),
        ..exercise("Global and multiline flags", "domain.com\ntest.com\nsite.com", &[".*\\.com$"], "gm")
      },
      ExerciseDefinition {
        // Lookbehind is missing from some browser engines; grade by exact text there.
        literal_fallback: true,
        ..exercise("Positive lookbehind", "Product Code: 1064 Price: $5", &["(?<=\\$)[0-9]+", "(?<=\\$)\\d+"], "g")
      },
    ],
  }]
}
