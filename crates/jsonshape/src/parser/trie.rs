//! Byte trie over object field names, compiled at plan-build time.
//!
//! The trie is stepped incrementally while key bytes are scanned, so a key
//! split across chunk boundaries (or across an escape sequence) keeps
//! matching without re-walking: the cursor is a plain integer stored in the
//! parser frame. A mismatch moves the cursor to a dead state that absorbs
//! the remaining bytes.

/// Cursor value for "no field can match anymore".
pub(crate) const DEAD: u32 = u32::MAX;

#[derive(Debug, Default)]
struct TrieNode {
    /// Sparse edge list; field-name alphabets are small enough that a
    /// linear scan beats a 256-way table.
    edges: Vec<(u8, u32)>,
    terminal: Option<u16>,
}

#[derive(Debug, Default)]
pub(crate) struct KeyTrie {
    nodes: Vec<TrieNode>,
}

impl KeyTrie {
    pub(crate) fn build<'a>(names: impl Iterator<Item = &'a str>) -> Self {
        let mut trie = Self {
            nodes: vec![TrieNode::default()],
        };
        for (index, name) in names.enumerate() {
            let mut at = 0usize;
            for &b in name.as_bytes() {
                at = match trie.nodes[at].edges.iter().find(|(edge, _)| *edge == b) {
                    Some(&(_, next)) => next as usize,
                    None => {
                        let next = trie.nodes.len();
                        trie.nodes.push(TrieNode::default());
                        trie.nodes[at].edges.push((b, next as u32));
                        next
                    }
                };
            }
            trie.nodes[at].terminal = Some(index as u16);
        }
        trie
    }

    pub(crate) fn root() -> u32 {
        0
    }

    /// Advance the cursor by one key byte.
    pub(crate) fn step(&self, state: u32, b: u8) -> u32 {
        if state == DEAD {
            return DEAD;
        }
        self.nodes[state as usize]
            .edges
            .iter()
            .find(|(edge, _)| *edge == b)
            .map_or(DEAD, |&(_, next)| next)
    }

    /// The field index reached, if the cursor sits on a complete name.
    pub(crate) fn terminal(&self, state: u32) -> Option<u16> {
        if state == DEAD {
            return None;
        }
        self.nodes[state as usize].terminal
    }
}

#[cfg(test)]
mod tests {
    use super::{KeyTrie, DEAD};

    fn run(trie: &KeyTrie, key: &str) -> Option<u16> {
        let mut state = KeyTrie::root();
        for &b in key.as_bytes() {
            state = trie.step(state, b);
        }
        trie.terminal(state)
    }

    #[test]
    fn matches_exact_names() {
        let trie = KeyTrie::build(["name", "age", "nagged"].into_iter());
        assert_eq!(run(&trie, "name"), Some(0));
        assert_eq!(run(&trie, "age"), Some(1));
        assert_eq!(run(&trie, "nagged"), Some(2));
    }

    #[test]
    fn prefixes_and_strangers_miss() {
        let trie = KeyTrie::build(["name", "age"].into_iter());
        assert_eq!(run(&trie, "nam"), None);
        assert_eq!(run(&trie, "names"), None);
        assert_eq!(run(&trie, "x"), None);
        assert_eq!(run(&trie, ""), None);
    }

    #[test]
    fn dead_state_absorbs() {
        let trie = KeyTrie::build(["a"].into_iter());
        let state = trie.step(KeyTrie::root(), b'z');
        assert_eq!(state, DEAD);
        assert_eq!(trie.step(state, b'a'), DEAD);
        assert_eq!(trie.terminal(state), None);
    }
}
