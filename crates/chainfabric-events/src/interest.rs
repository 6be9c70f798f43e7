//! Reference-counted interest set.

use chainfabric_core::wire::Interest;

/// The interests the hub has declared to the peer.
///
/// Each distinct interest appears once, in first-acquired order, with a
/// count of the registrations that need it.
#[derive(Debug, Clone, Default)]
pub struct InterestSet {
    entries: Vec<(Interest, usize)>,
}

impl InterestSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a reference on `interest`. Returns `true` if it was not present.
    pub fn acquire(&mut self, interest: &Interest) -> bool {
        match self.entries.iter_mut().find(|(i, _)| i == interest) {
            Some((_, count)) => {
                *count += 1;
                false
            }
            None => {
                self.entries.push((interest.clone(), 1));
                true
            }
        }
    }

    /// Drop a reference on `interest`. Returns `true` if that was the last one
    /// and the interest left the set.
    pub fn release(&mut self, interest: &Interest) -> bool {
        let Some(pos) = self.entries.iter().position(|(i, _)| i == interest) else {
            return false;
        };
        let count = &mut self.entries[pos].1;
        *count -= 1;
        if *count == 0 {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, interest: &Interest) -> bool {
        self.entries.iter().any(|(i, _)| i == interest)
    }

    pub fn to_vec(&self) -> Vec<Interest> {
        self.entries.iter().map(|(i, _)| i.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
