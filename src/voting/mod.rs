pub mod ballot;
pub mod schulze;

pub use ballot::{ballot_from_json, ballot_from_ranks};
pub use schulze::rank;

/// One voter's preferences as ordered tie groups; group 0 is most preferred.
///
/// Candidates left out of every group are tied below the last group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ballot<C> {
    groups: Vec<Vec<C>>,
}

impl<C> Ballot<C> {
    pub fn new(groups: Vec<Vec<C>>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[Vec<C>] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.is_empty())
    }
}

// Position of a single candidate in a ranking result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedCandidate<C> {
    pub candidate: C,
    pub wins: usize, // Number of candidates this one beats by strongest path
    pub rank: usize, // 1 = best, ties share a rank
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchulzeRanking<C> {
    pub entries: Vec<RankedCandidate<C>>, // Best first
}

impl<C: PartialEq> SchulzeRanking<C> {
    pub fn rank_of(&self, candidate: &C) -> Option<usize> {
        self.entries
            .iter()
            .find(|e| &e.candidate == candidate)
            .map(|e| e.rank)
    }

    /// Every candidate sharing rank 1.
    pub fn winners(&self) -> Vec<&C> {
        self.entries
            .iter()
            .filter(|e| e.rank == 1)
            .map(|e| &e.candidate)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
