// src/fileclass/dfa.rs
//
// Table-driven byte DFA used for suffix and prefix classification.
// States are rows of 256 transitions; terminal states carry a token.
// Matching is ASCII-case-insensitive.

const NONE: u16 = u16::MAX;

pub struct ByteDfa {
    trans: Vec<[u16; 256]>,
    token: Vec<Option<u8>>,
}

impl ByteDfa {
    /// Build from (sequence, token) entries. Sequences are inserted
    /// as given; callers wanting suffix semantics insert reversed
    /// sequences and walk the input right-to-left.
    pub fn new(entries: &[(&[u8], u8)]) -> Self {
        let mut dfa = Self {
            trans: vec![[NONE; 256]],
            token: vec![None],
        };
        for (seq, tok) in entries {
            dfa.insert(seq, *tok);
        }
        dfa
    }

    fn insert(&mut self, seq: &[u8], tok: u8) {
        let mut state = 0usize;
        for &b in seq {
            let b = b.to_ascii_lowercase() as usize;
            let next = self.trans[state][b];
            state = if next == NONE {
                let id = self.trans.len() as u16;
                self.trans.push([NONE; 256]);
                self.token.push(None);
                self.trans[state][b] = id;
                id as usize
            } else {
                next as usize
            };
        }
        self.token[state] = Some(tok);
    }

    /// Walk `bytes` as far as the table allows and return the token of
    /// the deepest terminal state passed through.
    pub fn longest_token<I: IntoIterator<Item = u8>>(&self, bytes: I) -> Option<u8> {
        let mut state = 0usize;
        let mut found = None;
        for b in bytes {
            let next = self.trans[state][b.to_ascii_lowercase() as usize];
            if next == NONE {
                break;
            }
            state = next as usize;
            if let Some(tok) = self.token[state] {
                found = Some(tok);
            }
        }
        found
    }

    /// Longest token reading `name` right-to-left, for suffix tables.
    pub fn longest_suffix_token(&self, name: &[u8]) -> Option<u8> {
        self.longest_token(name.iter().rev().copied())
    }

    /// Longest token reading `name` left-to-right, for prefix tables.
    pub fn longest_prefix_token(&self, name: &[u8]) -> Option<u8> {
        self.longest_token(name.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reversed(s: &[u8]) -> Vec<u8> {
        s.iter().rev().copied().collect()
    }

    #[test]
    fn prefix_matching() {
        let dfa = ByteDfa::new(&[(b"tmp.", 1), (b"temp.", 2)]);
        assert_eq!(dfa.longest_prefix_token(b"tmp.file"), Some(1));
        assert_eq!(dfa.longest_prefix_token(b"temp.file"), Some(2));
        assert_eq!(dfa.longest_prefix_token(b"TEMP.file"), Some(2));
        assert_eq!(dfa.longest_prefix_token(b"other"), None);
        assert_eq!(dfa.longest_prefix_token(b"tmp"), None);
    }

    #[test]
    fn suffix_matching_takes_longest() {
        let gz = reversed(b".gz");
        let vcfgz = reversed(b".vcf.gz");
        let dfa = ByteDfa::new(&[(&gz, 1), (&vcfgz, 2)]);

        assert_eq!(dfa.longest_suffix_token(b"x.gz"), Some(1));
        assert_eq!(dfa.longest_suffix_token(b"x.vcf.gz"), Some(2));
        assert_eq!(dfa.longest_suffix_token(b"x.VCF.GZ"), Some(2));
        assert_eq!(dfa.longest_suffix_token(b"x.vcf"), None);
    }

    #[test]
    fn shared_prefixes_coexist() {
        let a = reversed(b".o");
        let b = reversed(b".oe");
        let dfa = ByteDfa::new(&[(&a, 1), (&b, 2)]);
        assert_eq!(dfa.longest_suffix_token(b"job.o"), Some(1));
        assert_eq!(dfa.longest_suffix_token(b"job.oe"), Some(2));
    }

    #[test]
    fn empty_name_matches_nothing() {
        let dfa = ByteDfa::new(&[(b"x", 1)]);
        assert_eq!(dfa.longest_prefix_token(b""), None);
    }

    #[test]
    fn non_ascii_bytes_walk_literally() {
        let seq = [0xffu8, 0xfe];
        let dfa = ByteDfa::new(&[(&seq, 9)]);
        assert_eq!(dfa.longest_prefix_token(&[0xff, 0xfe, b'x']), Some(9));
    }
}
