//! Assembly of outbound payloads from identity, session and queue state.
use std::collections::HashMap;

use crate::{
    clock::Clock,
    identity::IdentityProvider,
    model::{
        ConsentBody, ConsentData, ConsentIdentifier, ConsentPayload, ConsentRecord,
        Configuration, Enrichment, Envelope, SubmissionData, SubmissionIdentifier,
        SubmissionPayload, System, Variables, VendorConsent, PROTOCOL_VERSION,
    },
    session::SessionController,
    TrackConfig,
};

/// Static description of the integration, shared by all payloads of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    pub system_type: String,
    pub user_agent: String,
    pub initiator: String,
}

/// Builds payloads for one tracking configuration.
///
/// Building a payload has side effects: identifiers may be minted and persisted, and building a
/// submission resumes or starts a session exactly once.
pub struct PayloadBuilder<'a> {
    pub config: &'a TrackConfig,
    pub system: &'a SystemInfo,
    pub clock: &'a dyn Clock,
    pub user: &'a IdentityProvider,
    pub consent: &'a IdentityProvider,
    pub session: &'a SessionController,
}

impl<'a> PayloadBuilder<'a> {
    /// Consent update carrying the full vendor set and the subset that changed.
    pub fn build_consent_payload(
        &self,
        vendors: &ConsentRecord,
        changed: &ConsentRecord,
    ) -> ConsentPayload {
        let timestamp = self.clock.now().timestamp_millis();

        Envelope {
            version: PROTOCOL_VERSION.to_owned(),
            system: self.system_block(timestamp, None, None),
            consent: None,
            configuration: self.configuration_block(),
            data: ConsentData {
                identifier: ConsentIdentifier {
                    user: self.user.get_or_create().into(),
                    consent: self.consent.get_or_create().into(),
                },
                consent: ConsentBody {
                    lastupdate: timestamp,
                    data: HashMap::new(),
                    vendors: vendors.clone(),
                    vendors_changed: changed.clone(),
                },
            },
        }
    }

    /// Data submission with `variables` (from a drained batch or supplied by the caller).
    ///
    /// `consents` are the last-known vendor decisions; `initiator` overrides
    /// [`SystemInfo::initiator`] for this payload only.
    pub fn build_submission_payload(
        &self,
        variables: Variables,
        enrichment: Enrichment,
        consents: &ConsentRecord,
        initiator: Option<&str>,
    ) -> SubmissionPayload {
        let (session_id, session_action) = self.session.start_or_resume();
        let timestamp = self.clock.now().timestamp_millis();

        let consent = consents
            .iter()
            .map(|(vendor, status)| (vendor.clone(), VendorConsent { status: *status }))
            .collect();

        Envelope {
            version: PROTOCOL_VERSION.to_owned(),
            system: self.system_block(timestamp, initiator, Some(session_id.clone())),
            consent: Some(consent),
            configuration: self.configuration_block(),
            data: SubmissionData {
                identifier: SubmissionIdentifier {
                    user: self.user.get_or_create().into(),
                    session: (session_id, session_action).into(),
                },
                variables,
                enrichment,
            },
        }
    }

    fn system_block(
        &self,
        timestamp: i64,
        initiator: Option<&str>,
        session_id: Option<String>,
    ) -> System {
        System {
            system_type: self.system.system_type.clone(),
            timestamp,
            navigator_user_agent: self.system.user_agent.clone(),
            initiator: initiator.unwrap_or(&self.system.initiator).to_owned(),
            session_id,
        }
    }

    fn configuration_block(&self) -> Configuration {
        Configuration {
            container: self.config.container.clone(),
            environment: self.config.environment.as_str().to_owned(),
            version: self.config.version.clone().unwrap_or_default(),
            debugcode: self.config.debug_code.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc, time::Duration};

    use chrono::TimeDelta;
    use serde_json::json;

    use super::{PayloadBuilder, SystemInfo};
    use crate::{
        clock::{Clock, ManualClock},
        events::{EventQueue, Properties},
        identity::IdentityProvider,
        model::{Action, ConsentStatus},
        session::SessionController,
        storage::{MemoryStorage, Storage},
        Environment, TrackConfig,
    };

    struct Fixture {
        config: TrackConfig,
        system: SystemInfo,
        clock: Arc<ManualClock>,
        user: IdentityProvider,
        consent: IdentityProvider,
        session: SessionController,
    }

    impl Fixture {
        fn new() -> Fixture {
            let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
            let clock = Arc::new(ManualClock::new());
            let config = TrackConfig::new("track.example.com", "acme", Environment::Stage)
                .with_version("7")
                .with_debug_code("dbg");
            Fixture {
                system: SystemInfo {
                    system_type: "app".to_owned(),
                    user_agent: "JentisSDK/test".to_owned(),
                    initiator: "jentis.app.test".to_owned(),
                },
                user: IdentityProvider::user(storage.clone(), &config.container),
                consent: IdentityProvider::consent(storage, &config.container),
                session: SessionController::new(Duration::from_secs(60), clock.clone()),
                clock,
                config,
            }
        }

        fn builder(&self) -> PayloadBuilder<'_> {
            PayloadBuilder {
                config: &self.config,
                system: &self.system,
                clock: &*self.clock,
                user: &self.user,
                consent: &self.consent,
                session: &self.session,
            }
        }
    }

    #[test]
    fn consent_payload_wire_shape() {
        let fixture = Fixture::new();
        let vendors = HashMap::from([
            ("googleanalytics".to_owned(), ConsentStatus::Ncm),
            ("facebook".to_owned(), ConsentStatus::Allow),
        ]);
        let changed = HashMap::from([("facebook".to_owned(), ConsentStatus::Allow)]);

        let payload = fixture.builder().build_consent_payload(&vendors, &changed);
        let value = serde_json::to_value(&payload).unwrap();

        let now = fixture.clock.now().timestamp_millis();
        let user_id = payload.data.identifier.user.id.clone();
        let consent_id = payload.data.identifier.consent.id.clone();
        assert_eq!(
            value,
            json!({
                "version": "3",
                "system": {
                    "type": "app",
                    "timestamp": now,
                    "navigator-userAgent": "JentisSDK/test",
                    "initiator": "jentis.app.test",
                },
                "configuration": {
                    "container": "acme",
                    "environment": "stage",
                    "version": "7",
                    "debugcode": "dbg",
                },
                "data": {
                    "identifier": {
                        "user": {"id": user_id, "action": "new"},
                        "consent": {"id": consent_id, "action": "new"},
                    },
                    "consent": {
                        "lastupdate": now,
                        "data": {},
                        "vendors": {"googleanalytics": "ncm", "facebook": true},
                        "vendorsChanged": {"facebook": true},
                    },
                },
            })
        );
    }

    #[test]
    fn identifiers_are_reused_across_payloads() {
        let fixture = Fixture::new();
        let first = fixture
            .builder()
            .build_consent_payload(&HashMap::new(), &HashMap::new());

        let second = fixture
            .builder()
            .build_consent_payload(&HashMap::new(), &HashMap::new());

        assert_eq!(second.data.identifier.user.id, first.data.identifier.user.id);
        assert_eq!(second.data.identifier.user.action, Action::Update);
        assert_eq!(second.data.identifier.consent.action, Action::Update);
    }

    #[test]
    fn submission_payload_wire_shape() {
        let fixture = Fixture::new();
        let queue = EventQueue::new();
        queue.push(Properties::from([
            ("track".to_owned(), "pageview".into()),
            ("a".to_owned(), "1".into()),
        ]));
        let consents = HashMap::from([("awin".to_owned(), ConsentStatus::Deny)]);

        let payload = fixture.builder().build_submission_payload(
            queue.drain().to_variables(),
            HashMap::new(),
            &consents,
            None,
        );
        let value = serde_json::to_value(&payload).unwrap();

        let session_id = payload.data.identifier.session.id.clone();
        assert_eq!(value["system"]["sessionID"], json!(session_id));
        assert_eq!(value["consent"], json!({"awin": {"status": false}}));
        assert_eq!(
            value["data"]["identifier"]["session"],
            json!({"id": session_id, "action": "new"})
        );
        assert_eq!(
            value["data"]["variables"],
            json!({
                "document_location_href": "",
                "fb_browser_id": "",
                "jtspushedcommands": ["pageview", "submit"],
                "product_id": [],
                "a": "1",
            })
        );
        assert!(value["data"].get("enrichment").is_none());
    }

    #[test]
    fn submission_resumes_session_once_per_build() {
        let fixture = Fixture::new();
        let build = || {
            fixture.builder().build_submission_payload(
                Default::default(),
                HashMap::new(),
                &HashMap::new(),
                None,
            )
        };

        let first = build();
        fixture.clock.advance(TimeDelta::seconds(30));
        let second = build();

        assert_eq!(first.data.identifier.session.action, Action::New);
        assert_eq!(second.data.identifier.session.action, Action::Update);
        assert_eq!(
            first.data.identifier.session.id,
            second.data.identifier.session.id
        );
    }

    #[test]
    fn timestamp_is_captured_at_build_time() {
        let fixture = Fixture::new();
        let first = fixture
            .builder()
            .build_consent_payload(&HashMap::new(), &HashMap::new());

        fixture.clock.advance(TimeDelta::milliseconds(1500));
        let second = fixture
            .builder()
            .build_consent_payload(&HashMap::new(), &HashMap::new());

        assert_eq!(second.system.timestamp - first.system.timestamp, 1500);
    }

    #[test]
    fn initiator_override_applies_to_one_payload() {
        let fixture = Fixture::new();

        let payload = fixture.builder().build_submission_payload(
            Default::default(),
            HashMap::new(),
            &HashMap::new(),
            Some("custom.initiator"),
        );

        assert_eq!(payload.system.initiator, "custom.initiator");
    }
}
