use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RankTableError {
    #[error("rank table is empty")]
    Empty,
    #[error("rank table must start at threshold 0, found {0}")]
    MissingBaseRank(u64),
    #[error("rank thresholds must be strictly ascending ('{title}' at {threshold})")]
    NotAscending { title: String, threshold: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rank {
    pub threshold: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl Rank {
    pub fn new(threshold: u64, title: impl Into<String>) -> Self {
        Self {
            threshold,
            title: title.into(),
            description: String::new(),
        }
    }
}

/// Static ladder of titles keyed by experience points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankTable {
    ranks: Vec<Rank>,
}

impl RankTable {
    pub fn new(ranks: Vec<Rank>) -> Result<Self, RankTableError> {
        let first = ranks.first().ok_or(RankTableError::Empty)?;
        if first.threshold != 0 {
            return Err(RankTableError::MissingBaseRank(first.threshold));
        }
        for pair in ranks.windows(2) {
            if pair[1].threshold <= pair[0].threshold {
                return Err(RankTableError::NotAscending {
                    title: pair[1].title.clone(),
                    threshold: pair[1].threshold,
                });
            }
        }
        Ok(Self { ranks })
    }

    pub fn ranks(&self) -> &[Rank] {
        &self.ranks
    }

    /// Highest rank whose threshold does not exceed `experience_points`.
    pub fn rank_for(&self, experience_points: u64) -> &Rank {
        let position = self
            .ranks
            .partition_point(|rank| rank.threshold <= experience_points);
        &self.ranks[position.saturating_sub(1)]
    }

    /// The rank after the current one and the XP still missing to reach it.
    pub fn next_rank(&self, experience_points: u64) -> Option<(&Rank, u64)> {
        self.ranks
            .iter()
            .find(|rank| rank.threshold > experience_points)
            .map(|rank| (rank, rank.threshold - experience_points))
    }
}

impl Default for RankTable {
    fn default() -> Self {
        let ranks = [
            (0, "Zaban City Candidate", "Still finding the power button."),
            (5_000, "Exam Rookie", "Variables make sense now."),
            (15_000, "Nen Student", "Loops written without tears."),
            (30_000, "Licensed Hunter", "Fundamentals licensed; small projects are in reach."),
            (50_000, "Single Star Hunter", "A capable programmer, junior-developer ready."),
            (75_000, "Double Star Hunter", "Comfortable with system design and algorithms."),
            (90_000, "Triple Star Hunter", "A living legend; companies come to you."),
        ]
        .into_iter()
        .map(|(threshold, title, description)| Rank {
            threshold,
            title: title.to_string(),
            description: description.to_string(),
        })
        .collect();
        Self { ranks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RankTable {
        RankTable::new(vec![
            Rank::new(0, "Novice"),
            Rank::new(100, "Apprentice"),
            Rank::new(500, "Expert"),
        ])
        .expect("rank table")
    }

    #[test]
    fn picks_highest_threshold_not_above_xp() {
        let table = table();
        assert_eq!(table.rank_for(0).title, "Novice");
        assert_eq!(table.rank_for(99).title, "Novice");
        assert_eq!(table.rank_for(100).title, "Apprentice");
        assert_eq!(table.rank_for(150).title, "Apprentice");
        assert_eq!(table.rank_for(10_000).title, "Expert");
    }

    #[test]
    fn next_rank_reports_missing_xp() {
        let table = table();
        let (next, missing) = table.next_rank(150).expect("next rank");
        assert_eq!(next.title, "Expert");
        assert_eq!(missing, 350);
        assert!(table.next_rank(500).is_none());
    }

    #[test]
    fn rejects_malformed_tables() {
        assert_eq!(RankTable::new(vec![]).unwrap_err(), RankTableError::Empty);
        assert_eq!(
            RankTable::new(vec![Rank::new(10, "x")]).unwrap_err(),
            RankTableError::MissingBaseRank(10)
        );
        assert!(matches!(
            RankTable::new(vec![Rank::new(0, "a"), Rank::new(0, "b")]).unwrap_err(),
            RankTableError::NotAscending { .. }
        ));
    }

    #[test]
    fn default_table_is_valid() {
        let table = RankTable::default();
        assert_eq!(RankTable::new(table.ranks().to_vec()), Ok(table.clone()));
        assert_eq!(table.rank_for(0).title, "Zaban City Candidate");
        assert_eq!(table.rank_for(95_000).title, "Triple Star Hunter");
    }
}
