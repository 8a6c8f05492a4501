/// Lexical classes of the filter language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Open,
    Close,
    Word(String),
}

impl Token {
    pub fn text(&self) -> &str {
        match self {
            Token::Open => "(",
            Token::Close => ")",
            Token::Word(w) => w,
        }
    }
}

/// Single left-to-right scan: whitespace separates words, parentheses always stand alone.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut out = Vec::new();
    let mut word = String::new();
    let flush = |word: &mut String, out: &mut Vec<Token>| {
        if !word.is_empty() {
            out.push(Token::Word(std::mem::take(word)));
        }
    };
    for c in input.chars() {
        match c {
            '(' | ')' => {
                flush(&mut word, &mut out);
                out.push(if c == '(' { Token::Open } else { Token::Close });
            }
            c if c.is_whitespace() => flush(&mut word, &mut out),
            c => word.push(c),
        }
    }
    flush(&mut word, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(s: &str) -> Token {
        Token::Word(s.to_string())
    }

    #[test]
    fn splits_on_whitespace_and_parens() {
        assert_eq!(
            tokenize("and (pod default/web-*)\tnot(namespace kube-system)"),
            vec![
                w("and"),
                Token::Open,
                w("pod"),
                w("default/web-*"),
                Token::Close,
                w("not"),
                Token::Open,
                w("namespace"),
                w("kube-system"),
                Token::Close,
            ]
        );
    }

    #[test]
    fn empty_and_blank_input() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   \n ").is_empty());
    }
}
