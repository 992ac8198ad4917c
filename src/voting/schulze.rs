use crate::voting::{Ballot, RankedCandidate, SchulzeRanking};
use log::debug;
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

/// Ranks `candidates` by the Schulze method.
///
/// Callers are expected to filter ballots down to `candidates` first; any
/// other entries are ignored. A candidate listed in more than one group of a
/// ballot keeps its first (best) position. Candidates with the same number of
/// beatpath wins share a rank and are listed in ascending `Ord` order, so the
/// output is fully determined by the input.
pub fn rank<C>(candidates: &[C], ballots: &[Ballot<C>]) -> SchulzeRanking<C>
where
    C: Ord + Hash + Clone,
{
    let ordered: Vec<C> = candidates
        .iter()
        .cloned()
        .collect::<BTreeSet<C>>()
        .into_iter()
        .collect();
    let n = ordered.len();
    if n == 0 {
        return SchulzeRanking { entries: Vec::new() };
    }
    let index: HashMap<&C, usize> = ordered.iter().enumerate().map(|(i, c)| (c, i)).collect();

    let defeats = tally_defeats(n, &index, ballots);
    let paths = strongest_paths(&defeats);

    let mut wins = vec![0usize; n];
    for a in 0..n {
        for b in 0..n {
            if a != b && paths[a][b] > paths[b][a] {
                wins[a] += 1;
            }
        }
    }

    // Stable sort keeps the Ord order among equal win counts.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&x, &y| wins[y].cmp(&wins[x]));

    let mut entries: Vec<RankedCandidate<C>> = Vec::with_capacity(n);
    for (position, &i) in order.iter().enumerate() {
        let rank = match entries.last() {
            Some(prev) if prev.wins == wins[i] => prev.rank,
            _ => position + 1,
        };
        entries.push(RankedCandidate {
            candidate: ordered[i].clone(),
            wins: wins[i],
            rank,
        });
    }

    debug!("Ranked {} candidates from {} ballots", n, ballots.len());
    SchulzeRanking { entries }
}

// d[a][b] = ballots preferring a strictly over b
fn tally_defeats<C>(n: usize, index: &HashMap<&C, usize>, ballots: &[Ballot<C>]) -> Vec<Vec<u32>>
where
    C: Eq + Hash,
{
    let mut d = vec![vec![0u32; n]; n];
    for ballot in ballots {
        // Unranked candidates share the slot after the last group.
        let bottom = ballot.groups().len();
        let mut position = vec![bottom; n];
        let mut seen = vec![false; n];
        for (group_rank, group) in ballot.groups().iter().enumerate() {
            for candidate in group {
                if let Some(&i) = index.get(candidate) {
                    if !seen[i] {
                        seen[i] = true;
                        position[i] = group_rank;
                    }
                }
            }
        }

        for a in 0..n {
            for b in 0..n {
                if a != b && position[a] < position[b] {
                    d[a][b] += 1;
                }
            }
        }
    }
    d
}

fn strongest_paths(d: &[Vec<u32>]) -> Vec<Vec<u32>> {
    let n = d.len();
    let mut p = vec![vec![0u32; n]; n];
    for a in 0..n {
        for b in 0..n {
            if a != b && d[a][b] > d[b][a] {
                p[a][b] = d[a][b];
            }
        }
    }

    // Intermediate candidate must be the outermost loop.
    for i in 0..n {
        for j in 0..n {
            if j == i {
                continue;
            }
            for k in 0..n {
                if k == i || k == j {
                    continue;
                }
                let through = p[j][i].min(p[i][k]);
                if through > p[j][k] {
                    p[j][k] = through;
                }
            }
        }
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ballot(groups: &[&[&'static str]]) -> Ballot<&'static str> {
        Ballot::new(groups.iter().map(|g| g.to_vec()).collect())
    }

    fn ranks(result: &SchulzeRanking<&'static str>) -> Vec<(&'static str, usize)> {
        result.entries.iter().map(|e| (e.candidate, e.rank)).collect()
    }

    #[test]
    fn empty_candidate_set_gives_empty_ranking() {
        let result = rank::<&str>(&[], &[ballot(&[&["A"]])]);
        assert!(result.is_empty());
    }

    #[test]
    fn no_ballots_ties_everyone_first() {
        let result = rank(&["C", "A", "B"], &[]);
        assert_eq!(ranks(&result), vec![("A", 1), ("B", 1), ("C", 1)]);
    }

    #[test]
    fn single_candidate_is_first() {
        let result = rank(&["A"], &[ballot(&[&["A"]])]);
        assert_eq!(ranks(&result), vec![("A", 1)]);
    }

    #[test]
    fn unanimous_ballots_follow_the_ballot_order() {
        let ballots: Vec<_> = (0..4).map(|_| ballot(&[&["A"], &["B"], &["C"]])).collect();
        let result = rank(&["A", "B", "C"], &ballots);
        assert_eq!(ranks(&result), vec![("A", 1), ("B", 2), ("C", 3)]);
    }

    #[test]
    fn two_of_three_ballots_decide_the_order() {
        let ballots = vec![
            ballot(&[&["A"], &["B"], &["C"]]),
            ballot(&[&["B"], &["C"], &["A"]]),
            ballot(&[&["A"], &["B"], &["C"]]),
        ];
        let result = rank(&["A", "B", "C"], &ballots);
        assert_eq!(ranks(&result), vec![("A", 1), ("B", 2), ("C", 3)]);
        assert_eq!(result.winners(), vec![&"A"]);
    }

    #[test]
    fn condorcet_winner_is_uniquely_first() {
        // B beats A 3-2 and C 4-1 pairwise without a first-place majority.
        let ballots = vec![
            ballot(&[&["A"], &["B"], &["C"]]),
            ballot(&[&["A"], &["B"], &["C"]]),
            ballot(&[&["B"], &["C"], &["A"]]),
            ballot(&[&["C"], &["B"], &["A"]]),
            ballot(&[&["B"], &["A"], &["C"]]),
        ];
        let result = rank(&["A", "B", "C"], &ballots);
        assert_eq!(result.rank_of(&"B"), Some(1));
        assert_eq!(result.winners(), vec![&"B"]);
    }

    #[test]
    fn identically_placed_candidates_share_a_rank() {
        let ballots = vec![
            ballot(&[&["A"], &["B", "C"]]),
            ballot(&[&["B", "C"], &["A"]]),
            ballot(&[&["A"]]),
        ];
        let result = rank(&["A", "B", "C"], &ballots);
        assert_eq!(result.rank_of(&"B"), result.rank_of(&"C"));
        assert_eq!(ranks(&result), vec![("A", 1), ("B", 2), ("C", 2)]);
    }

    #[test]
    fn competition_ranking_skips_after_ties() {
        // A and B tie on top, C below both.
        let ballots = vec![
            ballot(&[&["A"], &["B"], &["C"]]),
            ballot(&[&["B"], &["A"], &["C"]]),
        ];
        let result = rank(&["A", "B", "C"], &ballots);
        assert_eq!(ranks(&result), vec![("A", 1), ("B", 1), ("C", 3)]);
    }

    #[test]
    fn unranked_candidates_tie_at_the_bottom() {
        let ballots = vec![ballot(&[&["B"]]), ballot(&[&["B"]])];
        let result = rank(&["A", "B", "C"], &ballots);
        assert_eq!(ranks(&result), vec![("B", 1), ("A", 2), ("C", 2)]);
    }

    #[test]
    fn beatpath_resolves_a_cycle() {
        // A>B 6-3, B>C 7-2, C>A 5-4: the weakest link C>A is overridden.
        let mut ballots = Vec::new();
        ballots.extend((0..4).map(|_| ballot(&[&["A"], &["B"], &["C"]])));
        ballots.extend((0..3).map(|_| ballot(&[&["B"], &["C"], &["A"]])));
        ballots.extend((0..2).map(|_| ballot(&[&["C"], &["A"], &["B"]])));
        let result = rank(&["A", "B", "C"], &ballots);
        assert_eq!(ranks(&result), vec![("A", 1), ("B", 2), ("C", 3)]);
    }

    #[test]
    fn unknown_candidates_are_ignored() {
        let ballots = vec![ballot(&[&["X"], &["B"], &["A"]])];
        let result = rank(&["A", "B"], &ballots);
        assert_eq!(ranks(&result), vec![("B", 1), ("A", 2)]);
    }

    #[test]
    fn repeated_candidate_keeps_best_position() {
        let ballots = vec![ballot(&[&["A"], &["B"], &["A"]])];
        let result = rank(&["A", "B"], &ballots);
        assert_eq!(ranks(&result), vec![("A", 1), ("B", 2)]);
    }

    #[test]
    fn output_is_independent_of_candidate_order() {
        let ballots = vec![
            ballot(&[&["D"], &["A", "C"]]),
            ballot(&[&["C"], &["D"]]),
        ];
        let first = rank(&["A", "B", "C", "D"], &ballots);
        let second = rank(&["D", "C", "B", "A", "C"], &ballots);
        assert_eq!(first, second);
    }
}
