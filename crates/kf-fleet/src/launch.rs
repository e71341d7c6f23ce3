//! Start a game server: check, compose, price, build, submit.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::LaunchConfig;
use crate::ec2::Ec2Market;
use crate::fleet::{self, FleetApi};
use crate::notify::{DiscordNotifier, Event, Notifier};
use crate::pricing::{self, PriceOracle, ZoneQuote};
use crate::template::{FsTemplates, TemplateNames, TemplateSource};
use crate::types::{Environment, Server, ServerState};
use crate::{Error, Result, bootstrap, timed};

/// What a submission produced.
#[derive(Debug, Clone, PartialEq)]
pub enum LaunchOutcome {
    /// The fleet request was accepted. `server` is the record to persist.
    Started {
        server: Server,
        request_id: String,
        zone: ZoneQuote,
    },
    /// The provider answered with something that is not a fleet request id.
    /// The server record must be left as it was.
    Unrecognized(String),
}

/// Human-readable result plus the record to write back, if it changed.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchReport {
    pub message: String,
    pub server: Option<Server>,
}

/// Drives a launch end to end against injected collaborators.
///
/// One launcher should be shared by everything that can start servers so the
/// in-flight guard sees every concurrent attempt.
pub struct Launcher {
    templates: Arc<dyn TemplateSource>,
    oracle: Arc<dyn PriceOracle>,
    fleet: Arc<dyn FleetApi>,
    notifier: Arc<dyn Notifier>,
    names: TemplateNames,
    zones: Vec<String>,
    call_timeout: Duration,
    in_flight: Mutex<HashSet<String>>,
}

impl Launcher {
    pub fn new(
        templates: Arc<dyn TemplateSource>,
        oracle: Arc<dyn PriceOracle>,
        fleet: Arc<dyn FleetApi>,
        notifier: Arc<dyn Notifier>,
        config: &LaunchConfig,
    ) -> Self {
        Self {
            templates,
            oracle,
            fleet,
            notifier,
            names: config.templates.clone(),
            zones: config.zones.clone(),
            call_timeout: config.call_timeout,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Production wiring: templates on disk, EC2 for prices and fleets,
    /// Discord for notifications.
    pub fn from_config(config: &LaunchConfig) -> Result<Self> {
        let market = Arc::new(Ec2Market::from_env()?);
        Ok(Self::new(
            Arc::new(FsTemplates::new(&config.template_dir)),
            market.clone(),
            market,
            Arc::new(DiscordNotifier::new()),
            config,
        ))
    }

    pub fn zones(&self) -> &[String] {
        &self.zones
    }

    /// Run a launch and fold every outcome into one status message.
    pub async fn launch(&self, server: &Server, env: &Environment) -> LaunchReport {
        match self.try_launch(server, env).await {
            Ok(LaunchOutcome::Started { server: updated, .. }) => LaunchReport {
                message: started_message(&updated, env),
                server: Some(updated),
            },
            Ok(LaunchOutcome::Unrecognized(response)) => LaunchReport {
                message: response,
                server: None,
            },
            Err(e) => {
                error!(server = %server.name, error = %e, "launch failed");
                LaunchReport {
                    message: format!("{} could not be started because {e}", server.name),
                    server: None,
                }
            }
        }
    }

    /// Run a launch, keeping the error taxonomy intact.
    ///
    /// `server` is never modified; on success the updated copy is returned in
    /// the outcome.
    pub async fn try_launch(&self, server: &Server, env: &Environment) -> Result<LaunchOutcome> {
        if server.last_state == ServerState::Started {
            return Err(Error::Precondition(server.name.clone()));
        }
        let ceiling = server.max_price()?;
        let _claim = self.claim(&server.name)?;

        info!(server = %server.name, instance = %server.instance, ceiling, "launching");

        let base = timed(
            "template load",
            self.call_timeout,
            self.templates.load(&self.names.fleet_config),
        )
        .await?;

        let bootstrap =
            bootstrap::compose(&*self.templates, &self.names, env, self.call_timeout).await?;

        let zone = pricing::resolve_zone(
            &*self.oracle,
            &self.zones,
            &server.instance,
            ceiling,
            self.call_timeout,
        )
        .await?
        .ok_or_else(|| Error::PriceTooHigh(server.name.clone()))?;

        let request = fleet::build_fleet_request(&base, &bootstrap, server, env, Utc::now())?;

        let response = timed(
            "fleet submission",
            self.call_timeout,
            self.fleet.submit(&request),
        )
        .await?;

        if !fleet::is_fleet_request_id(&response) {
            warn!(server = %server.name, response = %response, "submission returned no fleet request id");
            return Ok(LaunchOutcome::Unrecognized(response));
        }

        let updated = server.started(&response);
        info!(
            server = %server.name,
            request_id = %response,
            zone = %zone.zone,
            price = zone.price,
            "spot fleet requested"
        );

        if let Err(e) = timed(
            "notification",
            self.call_timeout,
            self.notifier.notify(&server.name, Event::Started, env),
        )
        .await
        {
            warn!(server = %server.name, error = %e, "started notification failed");
        }

        Ok(LaunchOutcome::Started {
            server: updated,
            request_id: response,
            zone,
        })
    }

    fn claim(&self, name: &str) -> Result<InFlight<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(name.to_string()) {
            return Err(Error::LaunchInProgress(name.to_string()));
        }
        Ok(InFlight {
            set: &self.in_flight,
            name: name.to_string(),
        })
    }
}

/// Holds a server name in the in-flight set until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.name);
    }
}

fn started_message(server: &Server, env: &Environment) -> String {
    format!(
        "{} is now starting with address {}\n\
         The game password is {}\n\
         To change settings, use Webadmin on port 8080. The user is admin and the password is {}",
        server.name,
        server.address(&env.domain),
        server.special.password,
        server.special.admin,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullNotifier;
    use crate::template::MemoryTemplates;
    use crate::types::Special;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{Notify, Semaphore};

    const BASE: &str = r#"{
        "IamFleetRole": "arn:aws:iam::£ACCOUNT:role/fleet",
        "SpotPrice": "£MAXPRICE",
        "ValidFrom": "£FROM",
        "ValidUntil": "£TO",
        "LaunchSpecifications": [{
            "InstanceType": "£INSTANCETYPE",
            "KeyName": "£KEY",
            "SecurityGroups": [{ "GroupId": "£SGID" }],
            "UserData": "£UDATA"
        }]
    }"#;

    fn templates() -> MemoryTemplates {
        MemoryTemplates::new()
            .with("config.json", BASE)
            .with("kf2/userdata.yml", "£PREPARE|£SERVICE|£MONITOR")
            .with("kf2/kf2server.sh", "svc £REGION")
            .with("kf2/monitor.sh", "mon £REGION")
            .with("kf2/prepare.sh", "prep £BUCKET")
    }

    fn server(state: ServerState) -> Server {
        Server {
            name: "Killing Floor".into(),
            code: "kf".into(),
            instance: "c5.large".into(),
            maxprice: "0.05".into(),
            last_state: state,
            last_sfr: None,
            special: Special {
                password: "pw".into(),
                admin: "adm".into(),
            },
            extra: Default::default(),
        }
    }

    fn env() -> Environment {
        Environment {
            region: "eu-west-2".into(),
            account_id: "123456789012".into(),
            security_group_id: "sg-0abc".into(),
            key_name: "kf-key".into(),
            hosted_zone_id: "Z123".into(),
            domain: "games.example".into(),
            facebook_token: String::new(),
            config_bucket: "kf-configs".into(),
            discord_webhook: None,
        }
    }

    #[derive(Default)]
    struct Prices {
        table: HashMap<String, f64>,
        asked: Mutex<Vec<String>>,
    }

    impl Prices {
        fn new(table: &[(&str, f64)]) -> Arc<Self> {
            Arc::new(Self {
                table: table.iter().map(|(z, p)| (z.to_string(), *p)).collect(),
                asked: Mutex::new(Vec::new()),
            })
        }

        fn asked(&self) -> Vec<String> {
            self.asked.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PriceOracle for Prices {
        async fn quote(&self, zone: &str, _instance_type: &str) -> Result<f64> {
            self.asked.lock().unwrap().push(zone.to_string());
            self.table
                .get(zone)
                .copied()
                .ok_or_else(|| Error::PriceQuery {
                    zone: zone.to_string(),
                    reason: "RequestLimitExceeded".into(),
                })
        }
    }

    struct Fleet {
        response: std::result::Result<String, String>,
        submitted: Mutex<Vec<Value>>,
    }

    impl Fleet {
        fn answering(id: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(id.to_string()),
                submitted: Mutex::new(Vec::new()),
            })
        }

        fn rejecting(reason: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Err(reason.to_string()),
                submitted: Mutex::new(Vec::new()),
            })
        }

        fn submitted(&self) -> Vec<Value> {
            self.submitted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FleetApi for Fleet {
        async fn submit(&self, config: &Value) -> Result<String> {
            self.submitted.lock().unwrap().push(config.clone());
            self.response.clone().map_err(Error::Submission)
        }
    }

    #[derive(Default)]
    struct Counter {
        sent: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Counter {
        async fn notify(&self, _server: &str, event: Event, _env: &Environment) -> Result<()> {
            assert_eq!(event, Event::Started);
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Notify("webhook down".into()));
            }
            Ok(())
        }
    }

    fn launcher(
        templates: MemoryTemplates,
        prices: Arc<dyn PriceOracle>,
        fleet: Arc<dyn FleetApi>,
        notifier: Arc<dyn Notifier>,
    ) -> Launcher {
        Launcher::new(
            Arc::new(templates),
            prices,
            fleet,
            notifier,
            &LaunchConfig::default(),
        )
    }

    const SFR: &str = "sfr-123e4567-e89b-12d3-a456-426614174000";

    #[tokio::test]
    async fn started_server_is_rejected_before_any_io() {
        let prices = Prices::new(&[("eu-west-2a", 0.01)]);
        let fleet = Fleet::answering(SFR);
        let notifier = Arc::new(Counter::default());
        let l = launcher(templates(), prices.clone(), fleet.clone(), notifier.clone());

        let err = l
            .try_launch(&server(ServerState::Started), &env())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Precondition(ref name) if name == "Killing Floor"));

        let report = l.launch(&server(ServerState::Started), &env()).await;
        assert_eq!(
            report.message,
            "Killing Floor could not be started because Killing Floor must be stopped first"
        );
        assert_eq!(report.server, None);

        assert!(prices.asked().is_empty());
        assert!(fleet.submitted().is_empty());
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_launch_marks_server_started() {
        let prices = Prices::new(&[("eu-west-2a", 0.02)]);
        let fleet = Fleet::answering(SFR);
        let notifier = Arc::new(Counter::default());
        let l = launcher(templates(), prices.clone(), fleet.clone(), notifier.clone());

        let original = server(ServerState::Stopped);
        let report = l.launch(&original, &env()).await;

        assert_eq!(
            report.message,
            "Killing Floor is now starting with address kf.games.example\n\
             The game password is pw\n\
             To change settings, use Webadmin on port 8080. The user is admin and the password is adm"
        );

        let updated = report.server.unwrap();
        assert_eq!(updated.last_state, ServerState::Started);
        assert_eq!(updated.last_sfr.as_deref(), Some(SFR));
        assert_eq!(original.last_state, ServerState::Stopped);

        assert_eq!(prices.asked(), vec!["eu-west-2a"]);
        assert_eq!(fleet.submitted().len(), 1);
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fallback_zone_does_not_leak_into_request() {
        let prices = Prices::new(&[
            ("eu-west-2a", 0.09),
            ("eu-west-2b", 0.08),
            ("eu-west-2c", 0.03),
        ]);
        let fleet = Fleet::answering(SFR);
        let l = launcher(templates(), prices.clone(), fleet.clone(), Arc::new(NullNotifier));

        let outcome = l
            .try_launch(&server(ServerState::Stopped), &env())
            .await
            .unwrap();

        match outcome {
            LaunchOutcome::Started { zone, request_id, .. } => {
                assert_eq!(zone.zone, "eu-west-2c");
                assert_eq!(request_id, SFR);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let submitted = fleet.submitted();
        let doc = &submitted[0];
        assert_eq!(doc["SpotPrice"], "0.05");
        assert_eq!(doc["IamFleetRole"], "arn:aws:iam::123456789012:role/fleet");
        let spec = &doc["LaunchSpecifications"][0];
        assert_eq!(spec["InstanceType"], "c5.large");
        assert_eq!(spec["KeyName"], "kf-key");
        assert_eq!(spec["SecurityGroups"][0]["GroupId"], "sg-0abc");
        assert!(!spec["UserData"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn all_zones_too_expensive_never_submits() {
        let prices = Prices::new(&[
            ("eu-west-2a", 0.09),
            ("eu-west-2b", 0.08),
            ("eu-west-2c", 0.07),
        ]);
        let fleet = Fleet::answering(SFR);
        let notifier = Arc::new(Counter::default());
        let l = launcher(templates(), prices.clone(), fleet.clone(), notifier.clone());

        let err = l
            .try_launch(&server(ServerState::Stopped), &env())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PriceTooHigh(ref name) if name == "Killing Floor"));

        let report = l.launch(&server(ServerState::Stopped), &env()).await;
        assert_eq!(
            report.message,
            "Killing Floor could not be started because \
             Spot instance price is currently too high to start Killing Floor"
        );
        assert_eq!(report.server, None);
        assert!(fleet.submitted().is_empty());
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unrecognized_response_is_returned_as_is() {
        let fleet = Fleet::answering("pending-approval");
        let notifier = Arc::new(Counter::default());
        let l = launcher(
            templates(),
            Prices::new(&[("eu-west-2a", 0.01)]),
            fleet,
            notifier.clone(),
        );

        let report = l.launch(&server(ServerState::Stopped), &env()).await;
        assert_eq!(report.message, "pending-approval");
        assert_eq!(report.server, None);
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_template_aborts_before_pricing() {
        let prices = Prices::new(&[("eu-west-2a", 0.01)]);
        let fleet = Fleet::answering(SFR);
        let l = launcher(
            MemoryTemplates::new().with("config.json", BASE),
            prices.clone(),
            fleet.clone(),
            Arc::new(Counter::default()),
        );

        let err = l
            .try_launch(&server(ServerState::Stopped), &env())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io { ref name, .. } if name == "kf2/userdata.yml"));
        assert!(prices.asked().is_empty());
        assert!(fleet.submitted().is_empty());
    }

    #[tokio::test]
    async fn price_query_failure_aborts_launch() {
        let prices = Prices::new(&[("eu-west-2a", 0.09)]);
        let fleet = Fleet::answering(SFR);
        let l = launcher(
            templates(),
            prices.clone(),
            fleet.clone(),
            Arc::new(Counter::default()),
        );

        let report = l.launch(&server(ServerState::Stopped), &env()).await;
        assert!(report.message.starts_with("Killing Floor could not be started because"));
        assert!(report.message.contains("eu-west-2b"));
        assert_eq!(prices.asked(), vec!["eu-west-2a", "eu-west-2b"]);
        assert!(fleet.submitted().is_empty());
    }

    #[tokio::test]
    async fn rejected_submission_leaves_server_alone() {
        let notifier = Arc::new(Counter::default());
        let l = launcher(
            templates(),
            Prices::new(&[("eu-west-2a", 0.01)]),
            Fleet::rejecting("MaxSpotFleetRequestCountExceeded"),
            notifier.clone(),
        );

        let report = l.launch(&server(ServerState::Stopped), &env()).await;
        assert_eq!(
            report.message,
            "Killing Floor could not be started because \
             spot fleet request was rejected: MaxSpotFleetRequestCountExceeded"
        );
        assert_eq!(report.server, None);
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn notification_failure_does_not_undo_start() {
        let notifier = Arc::new(Counter {
            fail: true,
            ..Counter::default()
        });
        let l = launcher(
            templates(),
            Prices::new(&[("eu-west-2a", 0.01)]),
            Fleet::answering(SFR),
            notifier.clone(),
        );

        let report = l.launch(&server(ServerState::Stopped), &env()).await;
        assert_eq!(
            report.server.map(|s| s.last_state),
            Some(ServerState::Started)
        );
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_max_price_is_reported() {
        let l = launcher(
            templates(),
            Prices::new(&[("eu-west-2a", 0.01)]),
            Fleet::answering(SFR),
            Arc::new(Counter::default()),
        );

        let mut s = server(ServerState::Stopped);
        s.maxprice = "cheap".into();
        let err = l.try_launch(&s, &env()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidMaxPrice(_)));
    }

    #[tokio::test]
    async fn unbounded_max_price_never_reaches_pricing() {
        let prices = Prices::new(&[("eu-west-2a", 0.01)]);
        let fleet = Fleet::answering(SFR);
        let l = launcher(
            templates(),
            prices.clone(),
            fleet.clone(),
            Arc::new(Counter::default()),
        );

        for ceiling in ["inf", "NaN", "-1"] {
            let mut s = server(ServerState::Stopped);
            s.maxprice = ceiling.into();
            let err = l.try_launch(&s, &env()).await.unwrap_err();
            assert!(matches!(err, Error::InvalidMaxPrice(_)), "{ceiling}");
        }
        assert!(prices.asked().is_empty());
        assert!(fleet.submitted().is_empty());
    }

    /// Never answers.
    struct Stalled;

    #[async_trait]
    impl TemplateSource for Stalled {
        async fn load(&self, _name: &str) -> Result<crate::template::Template> {
            std::future::pending().await
        }
    }

    #[async_trait]
    impl FleetApi for Stalled {
        async fn submit(&self, _config: &Value) -> Result<String> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_template_load_times_out() {
        let prices = Prices::new(&[("eu-west-2a", 0.01)]);
        let l = Launcher::new(
            Arc::new(Stalled),
            prices.clone(),
            Fleet::answering(SFR),
            Arc::new(NullNotifier),
            &LaunchConfig::default(),
        );

        let err = l
            .try_launch(&server(ServerState::Stopped), &env())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout { step: "template load", after } if after == Duration::from_secs(30)
        ));
        assert!(prices.asked().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_submission_times_out() {
        let notifier = Arc::new(Counter::default());
        let l = launcher(
            templates(),
            Prices::new(&[("eu-west-2a", 0.01)]),
            Arc::new(Stalled),
            notifier.clone(),
        );

        let report = l.launch(&server(ServerState::Stopped), &env()).await;
        assert_eq!(report.server, None);
        let err = l
            .try_launch(&server(ServerState::Stopped), &env())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { step: "fleet submission", .. }));
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 0);
    }

    /// Blocks every quote until released, announcing when one arrives.
    struct Gated {
        entered: Notify,
        release: Semaphore,
    }

    #[async_trait]
    impl PriceOracle for Gated {
        async fn quote(&self, _zone: &str, _instance_type: &str) -> Result<f64> {
            self.entered.notify_one();
            self.release
                .acquire()
                .await
                .expect("semaphore closed")
                .forget();
            Ok(0.01)
        }
    }

    #[tokio::test]
    async fn concurrent_launch_of_same_server_is_refused() {
        let gate = Arc::new(Gated {
            entered: Notify::new(),
            release: Semaphore::new(0),
        });
        let fleet = Fleet::answering(SFR);
        let l = Arc::new(launcher(
            templates(),
            gate.clone(),
            fleet.clone(),
            Arc::new(Counter::default()),
        ));

        let first = tokio::spawn({
            let l = l.clone();
            async move { l.try_launch(&server(ServerState::Stopped), &env()).await }
        });
        gate.entered.notified().await;

        let err = l
            .try_launch(&server(ServerState::Stopped), &env())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LaunchInProgress(ref name) if name == "Killing Floor"));

        gate.release.add_permits(1);
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, LaunchOutcome::Started { .. }));
        assert_eq!(fleet.submitted().len(), 1);

        // The claim is released once the first attempt finishes.
        gate.release.add_permits(1);
        let again = l.try_launch(&server(ServerState::Stopped), &env()).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn failed_launch_releases_claim() {
        let l = launcher(
            templates(),
            Prices::new(&[]),
            Fleet::answering(SFR),
            Arc::new(Counter::default()),
        );

        for _ in 0..2 {
            let err = l
                .try_launch(&server(ServerState::Stopped), &env())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::PriceQuery { .. }));
        }
    }
}
