// src/wildcard.rs
//
// Compiled state machine mapping byte paths to caller-defined group
// values. `*` matches zero or more arbitrary bytes; every other byte
// is literal and `/` is not special. Matching is greedy: the result
// is the group carried by the state reached after consuming the whole
// input.
//
// Construction merges all patterns into one literal-prefix trie whose
// `*` items become self-looping states. A BFS finalise pass fills the
// unset transitions of branch states with Aho-Corasick style fallback
// into their governing star, so re-entrant continuations (e.g. `*abab`
// on `ababab`) resolve the way the equivalent greedy regex would.

use crate::error::{Error, Result};

const UNSET: u32 = u32::MAX;
const SINK: u32 = 0;
const START: u32 = 1;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Item {
    Lit(u8),
    Star,
}

fn parse_pattern(pattern: &[u8]) -> Vec<Item> {
    let mut items = Vec::with_capacity(pattern.len());
    for &b in pattern {
        if b == b'*' {
            if items.last() != Some(&Item::Star) {
                items.push(Item::Star);
            }
        } else {
            items.push(Item::Lit(b));
        }
    }
    items
}

struct BuildState {
    trans: [u32; 256],
    parent: u32,
    in_byte: u8,
    /// Nearest star ancestor in the trie; SINK when anchored.
    star_ctx: u32,
    is_star: bool,
    group: Option<u32>,
    group_pattern: usize,
}

impl BuildState {
    fn new(parent: u32, in_byte: u8, star_ctx: u32) -> Self {
        Self {
            trans: [UNSET; 256],
            parent,
            in_byte,
            star_ctx,
            is_star: false,
            group: None,
            group_pattern: 0,
        }
    }
}

/// An in-progress match. Copy it to fork a directory-prefix match
/// into per-file basename matches.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MatchState(u32);

/// Compiled wildcard matcher. Immutable after build; safe to share
/// across concurrent match invocations.
#[derive(Debug)]
pub struct PathGrouper<G> {
    trans: Vec<[u32; 256]>,
    group: Vec<Option<u32>>,
    groups: Vec<G>,
}

impl<G: PartialEq> PathGrouper<G> {
    pub fn compile<P: AsRef<[u8]>>(patterns: Vec<(P, G)>) -> Result<Self> {
        let mut builder = Builder::new();
        let mut groups = Vec::with_capacity(patterns.len());
        for (i, (pattern, group)) in patterns.into_iter().enumerate() {
            builder.insert(pattern.as_ref(), i as u32, &groups, &group)?;
            groups.push(group);
        }
        let (trans, group) = builder.finalise();
        Ok(Self {
            trans,
            group,
            groups,
        })
    }

    pub fn start(&self) -> MatchState {
        MatchState(START)
    }

    #[inline]
    pub fn step(&self, state: MatchState, byte: u8) -> MatchState {
        MatchState(self.trans[state.0 as usize][byte as usize])
    }

    pub fn feed(&self, mut state: MatchState, bytes: &[u8]) -> MatchState {
        for &b in bytes {
            if state.0 == SINK {
                return state;
            }
            state = self.step(state, b);
        }
        state
    }

    /// True once a match can no longer succeed on any continuation.
    pub fn is_dead(&self, state: MatchState) -> bool {
        state.0 == SINK
    }

    /// Group carried by the current state, if it is terminal.
    pub fn group(&self, state: MatchState) -> Option<&G> {
        self.group[state.0 as usize].map(|g| &self.groups[g as usize])
    }

    pub fn match_path(&self, path: &[u8]) -> Option<&G> {
        self.group(self.feed(self.start(), path))
    }

    pub fn state_count(&self) -> usize {
        self.trans.len()
    }
}

struct Builder {
    states: Vec<BuildState>,
    patterns: Vec<Vec<u8>>,
}

impl Builder {
    fn new() -> Self {
        let sink = BuildState {
            trans: [SINK; 256],
            ..BuildState::new(SINK, 0, SINK)
        };
        let start = BuildState::new(SINK, 0, SINK);
        Self {
            states: vec![sink, start],
            patterns: Vec::new(),
        }
    }

    fn insert<G: PartialEq>(
        &mut self,
        pattern: &[u8],
        group_idx: u32,
        groups: &[G],
        group: &G,
    ) -> Result<()> {
        let items = parse_pattern(pattern);
        let mut cur = START;

        for item in items {
            match item {
                Item::Lit(c) => {
                    let existing = self.states[cur as usize].trans[c as usize];
                    cur = if existing == UNSET {
                        let ctx = if self.states[cur as usize].is_star {
                            cur
                        } else {
                            self.states[cur as usize].star_ctx
                        };
                        let id = self.states.len() as u32;
                        self.states.push(BuildState::new(cur, c, ctx));
                        self.states[cur as usize].trans[c as usize] = id;
                        id
                    } else {
                        existing
                    };
                }
                Item::Star => {
                    self.states[cur as usize].is_star = true;
                }
            }
        }

        let state = &mut self.states[cur as usize];
        match state.group {
            None => {
                state.group = Some(group_idx);
                state.group_pattern = self.patterns.len();
            }
            Some(existing) if groups[existing as usize] == *group => {}
            Some(_) => {
                return Err(Error::AmbiguousPattern {
                    first: String::from_utf8_lossy(&self.patterns[state.group_pattern])
                        .into_owned(),
                    second: String::from_utf8_lossy(pattern).into_owned(),
                });
            }
        }

        self.patterns.push(pattern.to_vec());
        Ok(())
    }

    /// Fill every unset transition. Stars loop to themselves; branch
    /// states fall back into their governing star via failure links
    /// computed in BFS order.
    fn finalise(mut self) -> (Vec<[u32; 256]>, Vec<Option<u32>>) {
        let n = self.states.len();
        let mut fail = vec![SINK; n];
        let mut order = Vec::with_capacity(n);

        // seed: fill the start state, queue its children
        let start_fill = if self.states[START as usize].is_star {
            START
        } else {
            SINK
        };
        for b in 0..256 {
            if self.states[START as usize].trans[b] == UNSET {
                self.states[START as usize].trans[b] = start_fill;
            } else {
                order.push(self.states[START as usize].trans[b]);
            }
        }

        let mut head = 0;
        while head < order.len() {
            let v = order[head];
            head += 1;

            let parent = self.states[v as usize].parent;
            let c = self.states[v as usize].in_byte;

            fail[v as usize] = if self.states[parent as usize].is_star {
                parent
            } else if self.states[parent as usize].star_ctx == SINK && parent != START {
                SINK
            } else if parent == START {
                // start already filled; its fallback entry for c
                start_fill
            } else {
                let f = fail[parent as usize];
                self.states[f as usize].trans[c as usize]
            };

            let fallback = fail[v as usize];

            // a state with no group of its own is still inside the
            // reach of whatever its fallback chain matches
            if self.states[v as usize].group.is_none() {
                self.states[v as usize].group = self.states[fallback as usize].group;
            }

            for b in 0..256 {
                let t = self.states[v as usize].trans[b];
                if t == UNSET {
                    self.states[v as usize].trans[b] = if self.states[v as usize].is_star {
                        v
                    } else {
                        self.states[fallback as usize].trans[b]
                    };
                } else {
                    order.push(t);
                }
            }
        }

        let trans = self.states.iter().map(|s| s.trans).collect();
        let group = self.states.iter().map(|s| s.group).collect();
        (trans, group)
    }
}
