use std::collections::{BTreeSet, HashMap};

use crate::error::{GptError, Result};

/// Character-level vocabulary: every distinct character of the corpus,
/// sorted, with its position as the token id.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    chars: Vec<char>,
    index: HashMap<char, i64>,
}

impl Vocabulary {
    pub fn from_text(text: &str) -> Self {
        let chars: Vec<char> = text.chars().collect::<BTreeSet<_>>().into_iter().collect();
        let index = chars
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i as i64))
            .collect();
        Vocabulary { chars, index }
    }

    pub fn vocab_size(&self) -> usize {
        self.chars.len()
    }

    pub fn encode(&self, text: &str) -> Result<Vec<i64>> {
        let mut tokens = Vec::with_capacity(text.len());
        for c in text.chars() {
            match self.index.get(&c) {
                Some(&token) => tokens.push(token),
                None => return Err(GptError::UnknownCharacter(c)),
            }
        }
        Ok(tokens)
    }

    pub fn decode_token(&self, token: i64) -> Result<char> {
        usize::try_from(token)
            .ok()
            .and_then(|i| self.chars.get(i).copied())
            .ok_or(GptError::UnknownToken(token))
    }

    pub fn decode(&self, tokens: &[i64]) -> Result<String> {
        tokens.iter().map(|&t| self.decode_token(t)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() -> Result<()> {
        let text = "First Citizen:\nBefore we proceed any further, hear me speak.";
        let vocab = Vocabulary::from_text(text);
        let tokens = vocab.encode(text)?;
        assert_eq!(vocab.decode(&tokens)?, text);
        Ok(())
    }

    #[test]
    fn test_sorted_dense_ids() -> Result<()> {
        let vocab = Vocabulary::from_text("cabbac");
        assert_eq!(vocab.vocab_size(), 3);
        assert_eq!(vocab.encode("abc")?, vec![0, 1, 2]);
        assert_eq!(vocab.decode_token(2)?, 'c');
        Ok(())
    }

    #[test]
    fn test_non_ascii_round_trip() -> Result<()> {
        let text = "héllo wörld ✓";
        let vocab = Vocabulary::from_text(text);
        assert_eq!(vocab.decode(&vocab.encode(text)?)?, text);
        Ok(())
    }

    #[test]
    fn test_unknown_character() {
        let vocab = Vocabulary::from_text("abc");
        assert!(matches!(
            vocab.encode("abz"),
            Err(GptError::UnknownCharacter('z'))
        ));
    }

    #[test]
    fn test_unknown_token() {
        let vocab = Vocabulary::from_text("abc");
        assert!(matches!(vocab.decode(&[0, 3]), Err(GptError::UnknownToken(3))));
        assert!(matches!(vocab.decode_token(-1), Err(GptError::UnknownToken(-1))));
    }
}
