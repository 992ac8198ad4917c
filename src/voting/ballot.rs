use crate::error::BallotError;
use crate::voting::Ballot;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Rank keys and their movies in the order they were written, repeats included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankEntries(pub Vec<(String, Vec<String>)>);

impl<'de> Deserialize<'de> for RankEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RankEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of rank keys to movie id lists")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, Vec<String>>()? {
                    entries.push(entry);
                }
                Ok(RankEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Builds a ballot from a stored vote: rank keys ("1", "2", ...) paired with
/// the movie ids placed at that rank.
///
/// Keys are ordered numerically, not lexically. Movies outside `live` (removed
/// from the proposal since the vote was cast) are dropped, along with any
/// group left empty.
pub fn ballot_from_ranks<'a, I>(raw: I, live: &HashSet<String>) -> Result<Ballot<String>, BallotError>
where
    I: IntoIterator<Item = (&'a String, &'a Vec<String>)>,
{
    let mut ordered: BTreeMap<u32, (&String, &Vec<String>)> = BTreeMap::new();
    for (key, movies) in raw {
        let rank: u32 = key
            .trim()
            .parse()
            .map_err(|_| BallotError::NonNumericRank(key.clone()))?;
        if let Some((other, _)) = ordered.insert(rank, (key, movies)) {
            let (first, second) = if other <= key { (other, key) } else { (key, other) };
            return Err(BallotError::DuplicateRank {
                first: first.clone(),
                second: second.clone(),
            });
        }
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut groups = Vec::with_capacity(ordered.len());
    for (_, (_, movies)) in ordered {
        let mut group = Vec::new();
        for movie in movies {
            if !seen.insert(movie.as_str()) {
                return Err(BallotError::DuplicateCandidate(movie.clone()));
            }
            if live.contains(movie) {
                group.push(movie.clone());
            }
        }
        if !group.is_empty() {
            groups.push(group);
        }
    }
    Ok(Ballot::new(groups))
}

/// Same as [`ballot_from_ranks`], reading the rank map from its JSON form.
/// A key written twice in the JSON is reported, not overwritten.
pub fn ballot_from_json(json: &str, live: &HashSet<String>) -> Result<Ballot<String>, BallotError> {
    let RankEntries(entries) = serde_json::from_str(json)?;
    ballot_from_ranks(entries.iter().map(|(k, v)| (k, v)), live)
}
