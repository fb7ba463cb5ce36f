//! Wire structures of the payloads sent to the collection endpoint.
//!
//! Both payload kinds share the [`Envelope`] shape and differ in their `data` body:
//! [`ConsentData`] for consent updates and [`SubmissionData`] for tracked events.
use std::collections::HashMap;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Protocol version of the envelope.
pub const PROTOCOL_VERSION: &str = "3";

/// Whether an identifier was just created or reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Created by this payload.
    New,
    /// Reused from an earlier payload.
    Update,
}

/// Consent decision for a single vendor.
///
/// On the wire, `Allow` and `Deny` are bare JSON booleans and `Ncm` is the bare string `"ncm"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsentStatus {
    /// The user allowed the vendor.
    Allow,
    /// The user denied the vendor.
    Deny,
    /// No-consent-mode: the vendor is neither allowed nor denied.
    Ncm,
}

const NCM: &str = "ncm";

/// Untagged wire representation of [`ConsentStatus`].
#[derive(Serialize)]
#[serde(untagged)]
enum VendorValue<'a> {
    Bool(bool),
    String(&'a str),
}

impl Serialize for ConsentStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = match self {
            ConsentStatus::Allow => VendorValue::Bool(true),
            ConsentStatus::Deny => VendorValue::Bool(false),
            ConsentStatus::Ncm => VendorValue::String(NCM),
        };
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConsentStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Owned {
            Bool(bool),
            String(String),
        }

        match Owned::deserialize(deserializer)? {
            Owned::Bool(true) => Ok(ConsentStatus::Allow),
            Owned::Bool(false) => Ok(ConsentStatus::Deny),
            Owned::String(s) if s == NCM => Ok(ConsentStatus::Ncm),
            Owned::String(s) => Err(de::Error::invalid_value(
                de::Unexpected::Str(&s),
                &"a boolean or \"ncm\"",
            )),
        }
    }
}

/// Mapping vendor name to consent decision.
pub type ConsentRecord = HashMap<String, ConsentStatus>;

/// Outer shape shared by consent and data-submission payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<D> {
    pub version: String,
    pub system: System,
    /// Last-known vendor decisions. Only present on data submissions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent: Option<HashMap<String, VendorConsent>>,
    pub configuration: Configuration,
    pub data: D,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct System {
    #[serde(rename = "type")]
    pub system_type: String,
    /// Milliseconds since Unix epoch, captured when the payload was built.
    pub timestamp: i64,
    #[serde(rename = "navigator-userAgent")]
    pub navigator_user_agent: String,
    pub initiator: String,
    #[serde(
        rename = "sessionID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub container: String,
    pub environment: String,
    pub version: String,
    pub debugcode: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorConsent {
    pub status: ConsentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub action: Action,
}

impl From<(String, Action)> for Identity {
    fn from((id, action): (String, Action)) -> Identity {
        Identity { id, action }
    }
}

/// Payload of a consent update.
pub type ConsentPayload = Envelope<ConsentData>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentData {
    pub identifier: ConsentIdentifier,
    pub consent: ConsentBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentIdentifier {
    pub user: Identity,
    pub consent: Identity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentBody {
    pub lastupdate: i64,
    /// Reserved. Always empty.
    pub data: HashMap<String, String>,
    pub vendors: ConsentRecord,
    pub vendors_changed: ConsentRecord,
}

/// Payload of a data submission.
pub type SubmissionPayload = Envelope<SubmissionData>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionData {
    pub identifier: SubmissionIdentifier,
    pub variables: Variables,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub enrichment: Enrichment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionIdentifier {
    pub user: Identity,
    pub session: Identity,
}

/// Submission variables: a few well-known fields plus arbitrary string properties at the same
/// JSON level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variables {
    /// Location of the tracked document, `""` if unknown.
    #[serde(default)]
    pub document_location_href: String,
    /// Facebook browser id, `""` if unknown.
    #[serde(default)]
    pub fb_browser_id: String,
    /// Commands of the submitted events followed by `submit`.
    pub jtspushedcommands: Vec<String>,
    /// Product ids of the submitted events.
    #[serde(default)]
    pub product_id: Vec<String>,
    /// Must not contain any of the well-known keys above.
    #[serde(flatten)]
    pub custom: HashMap<String, String>,
}

impl Variables {
    pub(crate) const DOCUMENT_LOCATION_HREF: &'static str = "document_location_href";
    pub(crate) const FB_BROWSER_ID: &'static str = "fb_browser_id";
    pub(crate) const JTSPUSHEDCOMMANDS: &'static str = "jtspushedcommands";
    pub(crate) const PRODUCT_ID: &'static str = "product_id";

    /// Build variables from merged custom properties. Well-known keys are moved out of `custom`
    /// into their fields, so they never appear twice in the JSON object.
    pub fn from_properties(
        mut custom: HashMap<String, String>,
        jtspushedcommands: Vec<String>,
        product_id: Vec<String>,
    ) -> Variables {
        let document_location_href = custom
            .remove(Variables::DOCUMENT_LOCATION_HREF)
            .unwrap_or_default();
        let fb_browser_id = custom.remove(Variables::FB_BROWSER_ID).unwrap_or_default();
        custom.remove(Variables::JTSPUSHEDCOMMANDS);
        custom.remove(Variables::PRODUCT_ID);

        Variables {
            document_location_href,
            fb_browser_id,
            jtspushedcommands,
            product_id,
            custom,
        }
    }
}

/// Enrichment plugin invocations, keyed by plugin id.
pub type Enrichment = HashMap<String, EnrichmentPlugin>;

/// Invocation of one server-side enrichment plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentPlugin {
    /// Plugin arguments.
    pub arguments: HashMap<String, serde_json::Value>,
    /// Variables the plugin fills in.
    pub variables: Vec<String>,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::{Action, ConsentStatus, Variables};

    #[test]
    fn consent_status_is_bare_json_value() {
        let vendors: HashMap<&str, ConsentStatus> = [
            ("vendorX", ConsentStatus::Allow),
            ("vendorY", ConsentStatus::Deny),
            ("vendorZ", ConsentStatus::Ncm),
        ]
        .into();

        let value = serde_json::to_value(&vendors).unwrap();
        assert_eq!(
            value,
            json!({"vendorX": true, "vendorY": false, "vendorZ": "ncm"})
        );

        let decoded: HashMap<String, ConsentStatus> = serde_json::from_value(value).unwrap();
        assert_eq!(decoded["vendorX"], ConsentStatus::Allow);
        assert_eq!(decoded["vendorY"], ConsentStatus::Deny);
        assert_eq!(decoded["vendorZ"], ConsentStatus::Ncm);
    }

    #[test]
    fn consent_status_rejects_other_values() {
        assert!(serde_json::from_str::<ConsentStatus>(r#""maybe""#).is_err());
        assert!(serde_json::from_str::<ConsentStatus>("1").is_err());
        assert!(serde_json::from_str::<ConsentStatus>(r#"{"status":true}"#).is_err());
    }

    #[test]
    fn action_is_lowercase() {
        assert_eq!(serde_json::to_value(Action::New).unwrap(), json!("new"));
        assert_eq!(serde_json::to_value(Action::Update).unwrap(), json!("update"));
    }

    #[test]
    fn variables_flatten_custom_properties() {
        let variables = Variables::from_properties(
            [
                ("price".to_owned(), "9.99".to_owned()),
                ("document_location_href".to_owned(), "https://a.example/".to_owned()),
                ("jtspushedcommands".to_owned(), "spoofed".to_owned()),
            ]
            .into(),
            vec!["product".to_owned(), "submit".to_owned()],
            vec![],
        );

        let value = serde_json::to_value(&variables).unwrap();
        assert_eq!(
            value,
            json!({
                "document_location_href": "https://a.example/",
                "fb_browser_id": "",
                "jtspushedcommands": ["product", "submit"],
                "product_id": [],
                "price": "9.99",
            })
        );

        let decoded: Variables = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, variables);
    }
}
