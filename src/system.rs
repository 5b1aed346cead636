//! The orchestrator: validates the service graph, instantiates every
//! [`Service`] in dependency order, wires cascade-start closures, and
//! aggregates every service's logs into one system-wide stream (spec.md §4.7).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::SystemError;
use crate::fanin::Fanin;
use crate::fanout::{Fanout, Unsubscribe};
use crate::service::{Service, ServiceCallbacks};
use crate::spec::{LogRecord, ServiceSpec};

/// Capacity of the hub's shared intermediate queue — the single point in the
/// whole system where a producer (a service's log forwarder) may block. See
/// spec.md §9 "Log broadcast ownership".
pub const HUB_QUEUE_DEPTH: usize = 65536;

struct Hub {
    fanin: Arc<Fanin<LogRecord>>,
    fanout: Arc<Fanout<LogRecord>>,
}

pub struct System {
    specs: Vec<ServiceSpec>,
    started: Mutex<bool>,
    service_by_name: Mutex<HashMap<String, Arc<Service>>>,
    hub: Mutex<Option<Hub>>,
}

impl System {
    pub fn new(specs: Vec<ServiceSpec>) -> Self {
        System {
            specs,
            started: Mutex::new(false),
            service_by_name: Mutex::new(HashMap::new()),
            hub: Mutex::new(None),
        }
    }

    pub fn started(&self) -> bool {
        *self.started.lock().unwrap()
    }

    /// Snapshot copy of every currently-instantiated service, by name.
    pub fn service_by_name(&self) -> HashMap<String, Arc<Service>> {
        self.service_by_name.lock().unwrap().clone()
    }

    /// Validates and instantiates the full service graph, then starts every
    /// root service (cascading to their dependents as each parent's startup
    /// probe becomes ready). If any individual root service fails to start,
    /// the whole `start` fails and every root already started is stopped
    /// again — see spec.md §9 "Partial failure of System.Start" (this
    /// implementation resolves that open question in favor of
    /// all-or-nothing, rather than the original's swallow-and-continue).
    pub async fn start(&self) -> Result<(), SystemError> {
        {
            let mut started = self.started.lock().unwrap();
            if *started {
                return Err(SystemError::AlreadyStarted);
            }
            *started = true;
        }

        match self.try_start().await {
            Ok(()) => Ok(()),
            Err(err) => {
                *self.started.lock().unwrap() = false;
                Err(err)
            }
        }
    }

    async fn try_start(&self) -> Result<(), SystemError> {
        let spec_by_name = validate(&self.specs)?;

        let (consumer_tx, consumer_rx) = mpsc::channel::<LogRecord>(HUB_QUEUE_DEPTH);
        let fanin = Arc::new(Fanin::new(consumer_tx));
        let fanout = Arc::new(Fanout::new(consumer_rx));

        let instantiated = instantiate(spec_by_name, fanin.clone())?;

        let mut started_names: Vec<String> = Vec::new();
        for spec in &self.specs {
            if !spec.depends_on.is_empty() {
                continue;
            }
            let service = instantiated.get(&spec.name).expect("every spec was instantiated");

            debug!(service = %spec.name, "starting root service");
            if let Err(err) = start_and_subscribe(service, &fanin).await {
                for rolled_back in started_names.iter().rev() {
                    if let Some(service) = instantiated.get(rolled_back) {
                        let _ = service.stop().await;
                    }
                }
                fanin.close();
                fanout.close();
                return Err(SystemError::ServiceStartFailed { name: spec.name.clone(), source: err });
            }
            started_names.push(spec.name.clone());
        }

        *self.hub.lock().unwrap() = Some(Hub { fanin, fanout });
        *self.service_by_name.lock().unwrap() = instantiated;

        Ok(())
    }

    /// Stops every instantiated service and tears down the hub. Best-effort:
    /// per-service stop errors are logged, not propagated (spec.md §5).
    pub async fn stop(&self) -> Result<(), SystemError> {
        {
            let mut started = self.started.lock().unwrap();
            if !*started {
                return Err(SystemError::NotStarted);
            }
            *started = false;
        }

        let services = self.service_by_name.lock().unwrap().clone();
        for (name, service) in services.iter() {
            if let Err(err) = service.stop().await {
                error!(service = %name, error = %err, "error stopping service");
            }
        }
        self.service_by_name.lock().unwrap().clear();

        if let Some(hub) = self.hub.lock().unwrap().take() {
            hub.fanout.close();
            hub.fanin.close();
        }

        Ok(())
    }

    /// Registers a fresh subscriber on the system-wide aggregated log
    /// stream. Fails if the system isn't started.
    pub fn subscribe_to_logs(&self) -> Result<(mpsc::Receiver<LogRecord>, Unsubscribe), SystemError> {
        let guard = self.hub.lock().unwrap();
        match guard.as_ref() {
            Some(hub) => Ok(hub.fanout.subscribe()),
            None => Err(SystemError::NotSubscribable),
        }
    }
}

fn validate(specs: &[ServiceSpec]) -> Result<HashMap<String, ServiceSpec>, SystemError> {
    let mut spec_by_name: HashMap<String, ServiceSpec> = HashMap::new();
    for spec in specs {
        if spec_by_name.contains_key(&spec.name) {
            return Err(SystemError::DuplicateServiceName(spec.name.clone()));
        }
        spec_by_name.insert(spec.name.clone(), spec.clone());
    }

    for spec in spec_by_name.values() {
        for dependency in &spec.depends_on {
            if !spec_by_name.contains_key(dependency) {
                return Err(SystemError::UnknownDependency {
                    referrer: spec.name.clone(),
                    name: dependency.clone(),
                });
            }
        }
    }

    Ok(spec_by_name)
}

/// Bounded fixed-point scan (spec.md §4.7 step 2): at most `|specs|` passes,
/// each pass instantiating every spec whose dependencies are all already
/// handled. A cycle (or any other unresolvable dependency) shows up as a
/// non-empty remainder after the final pass — reported by name, not just
/// count, per spec.md §9's call for explicit cycle diagnostics.
fn instantiate(
    mut unhandled: HashMap<String, ServiceSpec>,
    fanin: Arc<Fanin<LogRecord>>,
) -> Result<HashMap<String, Arc<Service>>, SystemError> {
    let total = unhandled.len();

    let mut dependents_of: HashMap<String, Vec<String>> = HashMap::new();
    for spec in unhandled.values() {
        for dependency in &spec.depends_on {
            dependents_of.entry(dependency.clone()).or_default().push(spec.name.clone());
        }
    }

    // Shared by every cascade closure below: by the time any closure
    // actually runs (a probe reporting ready, strictly after this function
    // returns), every service named in any `depends_on` list has already
    // been inserted here.
    let services: Arc<Mutex<HashMap<String, Arc<Service>>>> = Arc::new(Mutex::new(HashMap::new()));

    for _ in 0..total.max(1) {
        if unhandled.is_empty() {
            break;
        }

        let ready: Vec<String> = unhandled
            .values()
            .filter(|spec| {
                spec.depends_on.iter().all(|dep| services.lock().unwrap().contains_key(dep))
            })
            .map(|spec| spec.name.clone())
            .collect();

        if ready.is_empty() {
            break;
        }

        for name in ready {
            let spec = unhandled.remove(&name).expect("name came from unhandled's own keys");
            let dependents = dependents_of.get(&name).cloned().unwrap_or_default();

            let callbacks = ServiceCallbacks {
                on_startup_ready: cascade_closure(name.clone(), dependents, services.clone(), fanin.clone()),
                ..ServiceCallbacks::default()
            };

            let service = Arc::new(Service::new(spec, callbacks));
            services.lock().unwrap().insert(name, service);
        }
    }

    if !unhandled.is_empty() {
        let unresolved: Vec<String> = unhandled.keys().cloned().collect();
        debug!(unresolved = ?unresolved, "dependency graph did not resolve after bounded scan");
        return Err(SystemError::UnresolvableGraph { unresolved, total });
    }

    let handled = services.lock().unwrap().clone();
    Ok(handled)
}

fn cascade_closure(
    parent_name: String,
    dependents: Vec<String>,
    services: Arc<Mutex<HashMap<String, Arc<Service>>>>,
    fanin: Arc<Fanin<LogRecord>>,
) -> Arc<dyn Fn() + Send + Sync> {
    Arc::new(move || {
        let snapshot: Vec<Arc<Service>> = {
            let guard = services.lock().unwrap();
            dependents.iter().filter_map(|dep| guard.get(dep).cloned()).collect()
        };

        for dependent in snapshot {
            let fanin = fanin.clone();
            let parent_name = parent_name.clone();
            tokio::spawn(async move {
                debug!(
                    parent = %parent_name,
                    service = %dependent.name(),
                    "cascade-starting dependent service"
                );
                if let Err(err) = start_and_subscribe(&dependent, &fanin).await {
                    error!(service = %dependent.name(), error = %err, "cascade start failed");
                }
            });
        }
    })
}

async fn start_and_subscribe(
    service: &Arc<Service>,
    fanin: &Fanin<LogRecord>,
) -> Result<(), crate::error::ServiceError> {
    service.start().await?;
    match service.subscribe_to_logs() {
        Ok((rx, unsubscribe)) => {
            fanin.consume(rx, unsubscribe);
        }
        Err(err) => {
            error!(service = %service.name(), error = %err, "unexpectedly failed to subscribe to logs");
        }
    }
    Ok(())
}
