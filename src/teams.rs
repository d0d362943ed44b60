use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamIdentity {
    pub abbr: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl TeamIdentity {
    pub fn matches_name(&self, name: &str) -> bool {
        let needle = name.trim();
        self.abbr.eq_ignore_ascii_case(needle)
            || self.name.eq_ignore_ascii_case(needle)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(needle))
    }
}

/// Abbreviation <-> display name table. Owned by config, never mutated by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<TeamIdentity>", into = "Vec<TeamIdentity>")]
pub struct TeamDirectory {
    teams: Vec<TeamIdentity>,
}

impl From<Vec<TeamIdentity>> for TeamDirectory {
    fn from(teams: Vec<TeamIdentity>) -> Self {
        Self::new(teams)
    }
}

impl From<TeamDirectory> for Vec<TeamIdentity> {
    fn from(dir: TeamDirectory) -> Self {
        dir.teams
    }
}

impl TeamDirectory {
    pub fn new(teams: Vec<TeamIdentity>) -> Self {
        let mut teams: Vec<TeamIdentity> = teams
            .into_iter()
            .map(|mut t| {
                t.abbr = t.abbr.trim().to_ascii_uppercase();
                t
            })
            .filter(|t| !t.abbr.is_empty())
            .collect();
        teams.sort_by(|a, b| a.abbr.cmp(&b.abbr));
        teams.dedup_by(|a, b| a.abbr == b.abbr);
        Self { teams }
    }

    /// Bare directory where each abbreviation is its own display name.
    pub fn from_abbreviations<'a>(abbrs: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(
            abbrs
                .into_iter()
                .map(|abbr| TeamIdentity {
                    abbr: abbr.to_string(),
                    name: abbr.to_string(),
                    aliases: Vec::new(),
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }

    /// Sorted abbreviations; this order defines the identity columns.
    pub fn abbreviations(&self) -> impl Iterator<Item = &str> {
        self.teams.iter().map(|t| t.abbr.as_str())
    }

    pub fn position(&self, abbr: &str) -> Option<usize> {
        self.teams
            .binary_search_by(|t| t.abbr.as_str().cmp(abbr))
            .ok()
    }

    pub fn contains(&self, abbr: &str) -> bool {
        self.position(abbr).is_some()
    }

    pub fn display_name(&self, abbr: &str) -> Option<&str> {
        self.position(abbr).map(|idx| self.teams[idx].name.as_str())
    }

    /// Resolves an abbreviation, display name or alias to the canonical abbreviation.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.teams
            .iter()
            .find(|t| t.matches_name(name))
            .map(|t| t.abbr.as_str())
    }
}
