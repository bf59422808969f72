use super::criteria::Criterion;
use crate::types::{Period, Tier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::info;

/// One configured achievement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementDef {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tier: Tier,
    pub ap_reward: i64,
    #[serde(default)]
    pub category: String,
    pub criterion: Criterion,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("catalog is not valid: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate achievement code `{0}`")]
    DuplicateCode(String),
    #[error("achievement `{0}` has an empty code or name")]
    MissingName(String),
    #[error("achievement `{code}` has negative reward {reward}")]
    NegativeReward { code: String, reward: i64 },
    #[error("achievement `{code}` has an invalid criterion: {reason}")]
    InvalidCriterion { code: String, reason: String },
}

/// Immutable, validated set of achievements, in file order.
#[derive(Debug, Clone)]
pub struct AchievementCatalog {
    defs: Vec<AchievementDef>,
    index: HashMap<String, usize>,
}

impl AchievementCatalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let catalog = Self::from_json(&raw)?;
        info!(
            "🏆 [Catalog] Loaded {} achievements from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let defs: Vec<AchievementDef> = serde_json::from_str(raw)?;
        Self::from_defs(defs)
    }

    pub fn from_defs(defs: Vec<AchievementDef>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(defs.len());
        for (i, def) in defs.iter().enumerate() {
            if def.code.trim().is_empty() || def.name.trim().is_empty() {
                return Err(CatalogError::MissingName(def.code.clone()));
            }
            if def.ap_reward < 0 {
                return Err(CatalogError::NegativeReward {
                    code: def.code.clone(),
                    reward: def.ap_reward,
                });
            }
            def.criterion
                .validate()
                .map_err(|reason| CatalogError::InvalidCriterion {
                    code: def.code.clone(),
                    reason,
                })?;
            if index.insert(def.code.clone(), i).is_some() {
                return Err(CatalogError::DuplicateCode(def.code.clone()));
            }
        }
        Ok(Self { defs, index })
    }

    pub fn get(&self, code: &str) -> Option<&AchievementDef> {
        self.index.get(code).map(|&i| &self.defs[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &AchievementDef> {
        self.defs.iter()
    }

    pub fn codes(&self) -> Vec<String> {
        self.defs.iter().map(|d| d.code.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// `max_rank` values used by leaderboard criteria of `period`.
    pub fn rank_thresholds(&self, period: Period) -> BTreeSet<u32> {
        self.defs
            .iter()
            .filter_map(|d| d.criterion.rank_requirement())
            .filter(|(p, _)| *p == period)
            .map(|(_, max_rank)| max_rank)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"[
        {"code": "first_blood", "name": "First Blood", "tier": "bronze", "ap_reward": 25,
         "category": "mining", "criterion": {"type": "event_count", "count": 1}},
        {"code": "top_10", "name": "Top 10", "tier": "gold", "ap_reward": 250,
         "criterion": {"type": "leaderboard_rank", "max_rank": 10}},
        {"code": "weekly_top_3", "name": "Weekly Podium", "tier": "gold", "ap_reward": 100,
         "criterion": {"type": "leaderboard_rank", "max_rank": 3, "period": "this_week"}}
    ]"#;

    #[test]
    fn test_loads_and_indexes() {
        let catalog = AchievementCatalog::from_json(SAMPLE).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.get("first_blood").unwrap().ap_reward, 25);
        assert_eq!(catalog.get("top_10").unwrap().tier, Tier::Gold);
        assert_eq!(
            catalog.rank_thresholds(Period::AllTime).into_iter().collect::<Vec<_>>(),
            vec![10]
        );
        assert_eq!(
            catalog.rank_thresholds(Period::ThisWeek).into_iter().collect::<Vec<_>>(),
            vec![3]
        );
    }

    #[test]
    fn test_rejects_unknown_tier_and_type() {
        let bad_tier = r#"[{"code":"x","name":"X","tier":"mythic","ap_reward":1,
            "criterion":{"type":"registration"}}]"#;
        assert!(matches!(
            AchievementCatalog::from_json(bad_tier),
            Err(CatalogError::Parse(_))
        ));

        let bad_type = r#"[{"code":"x","name":"X","tier":"bronze","ap_reward":1,
            "criterion":{"type":"lunar"}}]"#;
        assert!(matches!(
            AchievementCatalog::from_json(bad_type),
            Err(CatalogError::Parse(_))
        ));
    }

    #[test]
    fn test_rejects_duplicates_and_negative_rewards() {
        let dup = r#"[
            {"code":"x","name":"X","tier":"bronze","ap_reward":1,"criterion":{"type":"registration"}},
            {"code":"x","name":"Y","tier":"bronze","ap_reward":1,"criterion":{"type":"verification"}}
        ]"#;
        assert!(matches!(
            AchievementCatalog::from_json(dup),
            Err(CatalogError::DuplicateCode(code)) if code == "x"
        ));

        let negative = r#"[{"code":"x","name":"X","tier":"bronze","ap_reward":-5,
            "criterion":{"type":"registration"}}]"#;
        assert!(matches!(
            AchievementCatalog::from_json(negative),
            Err(CatalogError::NegativeReward { reward: -5, .. })
        ));
    }

    #[test]
    fn test_rejects_equal_hours() {
        let raw = r#"[{"code":"x","name":"X","tier":"silver","ap_reward":1,
            "criterion":{"type":"time_of_day","start_hour":3,"end_hour":3}}]"#;
        assert!(matches!(
            AchievementCatalog::from_json(raw),
            Err(CatalogError::InvalidCriterion { .. })
        ));
    }

    #[test]
    fn test_shipped_catalog_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/achievements.json");
        let catalog = AchievementCatalog::load(path).unwrap();
        assert!(catalog.get("first_blood").is_some());
        assert!(catalog.len() >= 25);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let catalog = AchievementCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.codes(), vec!["first_blood", "top_10", "weekly_top_3"]);
    }
}
