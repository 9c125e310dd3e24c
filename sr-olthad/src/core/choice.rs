//! Multiple-choice questions posed to the LM.

use serde::Serialize;
use thiserror::Error;

/// An option in a multiple-choice question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MultipleChoiceOption {
    pub letter: &'static str,
    pub text: &'static str,
}

/// A yes/no question: the option chosen when the answer is `true` and when
/// it is `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryChoiceOptions {
    pub yes: MultipleChoiceOption,
    pub no: MultipleChoiceOption,
}

impl BinaryChoiceOptions {
    pub fn get(&self, answer: bool) -> &MultipleChoiceOption {
        if answer { &self.yes } else { &self.no }
    }

    /// Map a free-text LM answer back to `true`/`false`.
    pub fn resolve(&self, response: &str) -> Result<bool, ChoiceError> {
        let letter = extract_letter(response, &[self.yes, self.no])?;
        Ok(letter == self.yes.letter)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("none of the answer choices were found in '{0}'")]
pub struct ChoiceError(pub String);

/// Find which option a free-text response picks.
///
/// Both sides are reduced to lowercase alphabetic characters. A response
/// equal to an option's letter, or containing an option's text, selects it.
/// Options are checked in order.
pub fn extract_letter(
    response: &str,
    options: &[MultipleChoiceOption],
) -> Result<&'static str, ChoiceError> {
    let chosen = clean(response);
    for option in options {
        if clean(option.letter) == chosen {
            return Ok(option.letter);
        }
        let text = clean(option.text);
        if !text.is_empty() && chosen.contains(&text) {
            return Ok(option.letter);
        }
    }
    Err(ChoiceError(response.to_string()))
}

fn clean(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(char::to_lowercase)
        .collect()
}
