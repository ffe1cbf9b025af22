//! # Catalog
//!
//! Static definitions of characters, use cases and their steps. The catalog
//! is owned by an external collaborator (typically loaded from JSON) and is
//! never mutated by a flow.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A named claim value carried by a credential template.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Attribute {
    /// Claim name.
    pub name: String,

    /// Claim value.
    pub value: AttributeValue,
}

/// Claim or predicate value. The agent accepts either strings or numbers.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Numeric value.
    Number(serde_json::Number),

    /// String value.
    Text(String),
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.into())
    }
}

/// Definition of a credential the agent issues to the holder.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StarterCredential {
    /// Template identifier.
    pub id: String,

    /// Icon path for display.
    #[serde(default)]
    pub icon: String,

    /// Display name, also used to key proof request groups.
    pub name: String,

    /// Claims to issue.
    #[serde(default)]
    pub attributes: Vec<Attribute>,

    /// Credential definition the agent issues against. Used to correlate
    /// exchange records back to their template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_definition_id: Option<String>,
}

/// Predicate requirement on a requested credential.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Predicate {
    /// Attribute the predicate applies to.
    pub name: String,

    /// Value to compare against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<AttributeValue>,

    /// Comparator, e.g. `>=`.
    #[serde(rename = "type")]
    pub type_: String,
}

/// What a proof step asks the holder to present from one credential.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestedCredential {
    /// Identifier within the section.
    #[serde(default)]
    pub id: String,

    /// Credential name; keys the attribute and predicate groups.
    pub name: String,

    /// Icon path for display.
    #[serde(default)]
    pub icon: String,

    /// Attribute names to reveal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<String>>,

    /// Predicate to prove without revealing the value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicates: Option<Predicate>,

    /// Credential definition the presentation must come from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_definition_id: Option<String>,
}

/// The organisation or person the holder interacts with in a section.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Display name, used as the invitation label.
    pub name: String,

    /// Icon path for display.
    #[serde(default)]
    pub icon: String,

    /// Image shown by the wallet when accepting the invitation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Options passed through to the agent with a proof request.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct RequestOptions {
    /// Name of the proof request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Comment shown to the holder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Kind of step. Selects the coordinator that drives the step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "StepTypeRepr", into = "String")]
pub enum StepType {
    /// Introductory content.
    Start,
    /// Informational content.
    Info,
    /// Establish a connection with the agent.
    Connection,
    /// Request a proof over the established connection.
    Proof,
    /// Request a proof out of band.
    ProofOob,
    /// Issue credentials over the established connection.
    Credential,
    /// End of a section's steps.
    StepEnd,
    /// End of the use case.
    End,
}

impl StepType {
    const ALL: [Self; 8] = [
        Self::Start,
        Self::Info,
        Self::Connection,
        Self::Proof,
        Self::ProofOob,
        Self::Credential,
        Self::StepEnd,
        Self::End,
    ];

    /// Whether activating the step completes the flow.
    #[must_use]
    pub const fn is_completion(self) -> bool {
        matches!(self, Self::StepEnd | Self::End)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Info => "INFO",
            Self::Connection => "CONNECTION",
            Self::Proof => "PROOF",
            Self::ProofOob => "PROOF_OOB",
            Self::Credential => "CREDENTIAL",
            Self::StepEnd => "STEP_END",
            Self::End => "END",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown step type: {s}"))
    }
}

impl From<StepType> for String {
    fn from(value: StepType) -> Self {
        value.as_str().to_string()
    }
}

// Content authored against the numeric enum serializes step types as their
// ordinal; accept both forms.
#[derive(Deserialize)]
#[serde(untagged)]
enum StepTypeRepr {
    Ordinal(usize),
    Name(String),
}

impl TryFrom<StepTypeRepr> for StepType {
    type Error = String;

    fn try_from(value: StepTypeRepr) -> Result<Self, Self::Error> {
        match value {
            StepTypeRepr::Ordinal(n) => {
                Self::ALL.get(n).copied().ok_or_else(|| format!("unknown step type ordinal: {n}"))
            }
            StepTypeRepr::Name(name) => name.parse(),
        }
    }
}

/// A single screen of a use case or onboarding flow.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Step identifier.
    pub id: String,

    /// Kind of step.
    #[serde(rename = "type")]
    pub type_: StepType,

    /// Title for display.
    #[serde(default)]
    pub title: String,

    /// Description for display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Options forwarded with proof requests created by this step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_options: Option<RequestOptions>,

    /// Advisory: the host should not offer a "back" control on this step.
    #[serde(default, alias = "isBackDisabled")]
    pub back_disabled: bool,
}

impl Step {
    /// Create a step with only the fields the sequencer needs.
    #[must_use]
    pub fn new(id: impl Into<String>, type_: StepType) -> Self {
        Self {
            id: id.into(),
            type_,
            title: String::new(),
            description: None,
            request_options: None,
            back_disabled: false,
        }
    }
}

/// A group of steps sharing an entity and credential requirements.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    /// Section identifier.
    pub id: String,

    /// Party the holder interacts with in this section.
    #[serde(default)]
    pub entity: Entity,

    /// Credentials requested by proof steps in this section.
    #[serde(default)]
    pub requested_credentials: Vec<RequestedCredential>,

    /// Credentials issued by credential steps in this section.
    #[serde(default)]
    pub issue_credentials: Vec<StarterCredential>,

    /// Ordered steps.
    pub steps: Vec<Step>,
}

/// Dashboard card for a use case.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Card {
    /// Card title.
    pub title: String,

    /// Card description.
    #[serde(default)]
    pub description: String,

    /// Card image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// A named scenario composed of ordered sections of steps.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct UseCase {
    /// Unique slug, recorded on completion.
    pub slug: String,

    /// Dashboard card.
    #[serde(default)]
    pub card: Card,

    /// Ordered sections.
    pub sections: Vec<Section>,
}

impl UseCase {
    /// The ordered steps of all sections, each paired with its section
    /// index.
    pub fn steps(&self) -> impl Iterator<Item = (usize, &Step)> {
        self.sections.iter().enumerate().flat_map(|(i, s)| s.steps.iter().map(move |st| (i, st)))
    }

    /// Credentials the holder must already hold to complete the use case:
    /// everything requested that the use case does not issue itself.
    #[must_use]
    pub fn required_credentials(&self) -> Vec<&RequestedCredential> {
        let issued: Vec<&str> = self
            .sections
            .iter()
            .flat_map(|s| s.issue_credentials.iter().map(|c| c.name.as_str()))
            .collect();
        self.sections
            .iter()
            .flat_map(|s| s.requested_credentials.iter())
            .filter(|r| !issued.contains(&r.name.as_str()))
            .collect()
    }
}

/// A persona the holder plays through onboarding.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    /// Character identifier.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Credentials available for issue during onboarding, keyed by position.
    #[serde(default)]
    pub starter_credentials: BTreeMap<usize, StarterCredential>,

    /// Party issuing the starter credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onboarding_entity: Option<Entity>,
}

impl Character {
    /// Starter credentials at the selected positions. Positions with no
    /// credential are skipped.
    #[must_use]
    pub fn selected_credentials(&self, selection: &[usize]) -> Vec<StarterCredential> {
        selection.iter().filter_map(|i| self.starter_credentials.get(i)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_type_accepts_ordinal_and_name() {
        let step: Step = serde_json::from_value(serde_json::json!({
            "id": "a", "type": 4, "title": "Scan"
        }))
        .expect("should deserialize ordinal");
        assert_eq!(step.type_, StepType::ProofOob);

        let step: Step = serde_json::from_value(serde_json::json!({
            "id": "b", "type": "STEP_END", "isBackDisabled": true
        }))
        .expect("should deserialize name");
        assert_eq!(step.type_, StepType::StepEnd);
        assert!(step.back_disabled);

        assert!(serde_json::from_value::<Step>(serde_json::json!({"id": "c", "type": 8})).is_err());
    }

    #[test]
    fn steps_keep_section_index() {
        let use_case: UseCase = serde_json::from_value(serde_json::json!({
            "slug": "study",
            "sections": [
                {"id": "s1", "steps": [
                    {"id": "a", "type": "START"},
                    {"id": "b", "type": "CONNECTION"}
                ]},
                {"id": "s2", "steps": []},
                {"id": "s3", "steps": [{"id": "c", "type": "END"}]}
            ]
        }))
        .expect("should deserialize");

        let steps: Vec<_> = use_case.steps().map(|(i, step)| (i, step.id.as_str())).collect();
        assert_eq!(steps, [(0, "a"), (0, "b"), (2, "c")]);
    }

    #[test]
    fn required_excludes_self_issued() {
        let use_case = UseCase {
            slug: "study".into(),
            sections: vec![
                Section {
                    id: "s1".into(),
                    issue_credentials: vec![StarterCredential {
                        name: "Student Card".into(),
                        ..StarterCredential::default()
                    }],
                    requested_credentials: vec![RequestedCredential {
                        name: "Student Card".into(),
                        ..RequestedCredential::default()
                    }],
                    ..Section::default()
                },
                Section {
                    id: "s2".into(),
                    requested_credentials: vec![RequestedCredential {
                        name: "Person".into(),
                        ..RequestedCredential::default()
                    }],
                    ..Section::default()
                },
            ],
            ..UseCase::default()
        };
        let names: Vec<&str> =
            use_case.required_credentials().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Person"]);
    }

    #[test]
    fn selection_skips_missing() {
        let character: Character = serde_json::from_value(serde_json::json!({
            "id": "alice",
            "name": "Alice",
            "starterCredentials": {
                "0": {"id": "1", "name": "Student Card", "attributes": []},
                "1": {"id": "2", "name": "Transcript", "attributes": [{"name": "gpa", "value": 4}]}
            }
        }))
        .expect("should deserialize character");
        let selected = character.selected_credentials(&[1, 5]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "Transcript");
        assert_eq!(selected[0].attributes[0].value, AttributeValue::from(4_i64));
    }
}
