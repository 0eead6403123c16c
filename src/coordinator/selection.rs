//! User selection over discovered units ("all" or 1-based indexes)

use crate::error::{Result, WardenError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    All,
    /// 1-based positions into the discovered list
    Indices(Vec<usize>),
}

impl Selection {
    /// Parse `all` or a comma-separated index list such as `1,3`.
    /// Entries that are not numbers are ignored.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if input.eq_ignore_ascii_case("all") || input.is_empty() {
            return Selection::All;
        }

        let indices = input
            .split(',')
            .filter_map(|part| part.trim().parse::<usize>().ok())
            .collect();
        Selection::Indices(indices)
    }

    /// Apply to the discovered units, keeping discovery order. Out-of-range
    /// indexes are skipped and duplicates collapse.
    pub fn apply(&self, units: &[String]) -> Result<Vec<String>> {
        let selected: Vec<String> = match self {
            Selection::All => units.to_vec(),
            Selection::Indices(indices) => units
                .iter()
                .enumerate()
                .filter(|(i, _)| indices.contains(&(i + 1)))
                .map(|(_, unit)| unit.clone())
                .collect(),
        };

        if selected.is_empty() {
            return Err(WardenError::InvalidSelection(match self {
                Selection::All => "no running units found".to_string(),
                Selection::Indices(indices) => format!(
                    "none of {:?} refer to one of the {} running units",
                    indices,
                    units.len()
                ),
            }));
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units() -> Vec<String> {
        vec!["web1".into(), "db".into(), "cache".into()]
    }

    #[test]
    fn test_parse_all() {
        assert_eq!(Selection::parse("all"), Selection::All);
        assert_eq!(Selection::parse(" ALL "), Selection::All);
        assert_eq!(Selection::parse(""), Selection::All);
    }

    #[test]
    fn test_parse_indices_ignores_garbage() {
        assert_eq!(Selection::parse("1, 3,x,"), Selection::Indices(vec![1, 3]));
    }

    #[test]
    fn test_apply_keeps_discovery_order_and_collapses_duplicates() {
        let selected = Selection::parse("3,1,3").apply(&units()).unwrap();
        assert_eq!(selected, vec!["web1", "cache"]);
    }

    #[test]
    fn test_apply_skips_out_of_range() {
        let selected = Selection::parse("0,2,9").apply(&units()).unwrap();
        assert_eq!(selected, vec!["db"]);
    }

    #[test]
    fn test_empty_selection_is_error() {
        assert!(Selection::parse("7").apply(&units()).is_err());
        assert!(Selection::All.apply(&[]).is_err());
    }
}
