pub mod events;
pub mod filename;
pub mod identity;
pub mod layout;
pub mod ratio;
pub mod record;

/// Which experiment protocol a source file records. Determines column
/// ranges, filename grammars, and the output schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// PR / TREATMENT progressive-ratio sessions.
    ProgressiveRatio,
    /// LGA / SHA long- and short-access self-administration sessions.
    SelfAdmin,
    /// PRESHOCK / SHOCK footshock sessions.
    Shock,
}

impl SessionKind {
    /// Output subdirectory name.
    pub fn dir(&self) -> &'static str {
        match self {
            SessionKind::ProgressiveRatio => "PR",
            SessionKind::SelfAdmin => "SHA",
            SessionKind::Shock => "SHOCK",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Drug {
    Cocaine,
    Oxycodone,
}

impl Drug {
    pub fn label(&self) -> &'static str {
        match self {
            Drug::Cocaine => "cocaine",
            Drug::Oxycodone => "oxycodone",
        }
    }

    /// Detect a drug marker anywhere in a path, filename, or worksheet name.
    pub fn from_text(text: &str) -> Option<Drug> {
        let up = text.to_uppercase();
        if up.contains("OXY") {
            Some(Drug::Oxycodone)
        } else if up.contains("COC") {
            Some(Drug::Cocaine)
        } else {
            None
        }
    }
}

/// Session metadata recovered from a filename or worksheet name.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMeta {
    pub room: Option<String>,
    pub cohort: i64,
    /// Normalized trial identifier, e.g. "LGA05", "PR03", "SHOCK_V2".
    pub trial_id: String,
}
