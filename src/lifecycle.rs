//! Component lifecycle orchestration
//!
//! Long-running pieces (file watchers, listeners) implement [`Component`].
//! [`Graph::build`] orders them once at startup: dependencies first, ties
//! broken by registration order. [`Runner::run`] starts them in that order,
//! waits for the first one to finish or for shutdown, then stops everything
//! in reverse.

use crate::loader::CancelToken;
use crossbeam_channel::RecvTimeoutError;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Error type returned by component hooks
pub type ComponentError = Box<dyn std::error::Error + Send + Sync>;

/// A long-running part of the process
///
/// `start` must not block. `wait` blocks until the component finishes on its
/// own, fails, or has been stopped. `stop` is required: every component has
/// to be able to shut down gracefully.
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    /// Names of components that must be started before this one
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn start(&self) -> Result<(), ComponentError>;

    fn wait(&self) -> Result<(), ComponentError>;

    fn stop(&self) -> Result<(), ComponentError>;
}

/// Invalid component graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A component has an empty name
    EmptyName,
    /// Two components share a name
    DuplicateName(String),
    /// A dependency names no registered component
    UnknownDependency { component: String, dependency: String },
    /// Components that could not be ordered
    Cycle(Vec<String>),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyName => write!(f, "component name cannot be empty"),
            ConfigError::DuplicateName(name) => write!(f, "duplicate component name: {}", name),
            ConfigError::UnknownDependency {
                component,
                dependency,
            } => write!(f, "{} depends on unknown component: {}", component, dependency),
            ConfigError::Cycle(names) => {
                write!(f, "dependency cycle among: {}", names.join(", "))
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Failure while running a graph
#[derive(Debug)]
pub enum RunError {
    /// A component failed to start; the ones before it were stopped
    Start { component: String, source: ComponentError },
    /// A component failed while running
    Failed { component: String, source: ComponentError },
    /// A component failed to stop
    Stop { component: String, source: ComponentError },
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Start { component, source } => {
                write!(f, "component {} failed to start: {}", component, source)
            }
            RunError::Failed { component, source } => {
                write!(f, "component {} failed: {}", component, source)
            }
            RunError::Stop { component, source } => {
                write!(f, "component {} failed to stop: {}", component, source)
            }
        }
    }
}

impl std::error::Error for RunError {}

/// Components in start order
pub struct Graph {
    ordered: Vec<Arc<dyn Component>>,
}

impl Graph {
    /// Topologically sort `components`
    pub fn build(components: Vec<Arc<dyn Component>>) -> Result<Self, ConfigError> {
        let mut index: HashMap<String, usize> = HashMap::with_capacity(components.len());
        for (i, component) in components.iter().enumerate() {
            let name = component.name();
            if name.is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if index.insert(name.to_string(), i).is_some() {
                return Err(ConfigError::DuplicateName(name.to_string()));
            }
        }

        let mut in_degree = vec![0usize; components.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); components.len()];
        for (i, component) in components.iter().enumerate() {
            for dependency in component.dependencies() {
                let dep = *index
                    .get(&dependency)
                    .ok_or_else(|| ConfigError::UnknownDependency {
                        component: component.name().to_string(),
                        dependency: dependency.clone(),
                    })?;
                dependents[dep].push(i);
                in_degree[i] += 1;
            }
        }

        // Min-heap on registration index keeps the order stable
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(components.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != components.len() {
            let stuck = in_degree
                .iter()
                .enumerate()
                .filter(|(_, degree)| **degree > 0)
                .map(|(i, _)| components[i].name().to_string())
                .collect();
            return Err(ConfigError::Cycle(stuck));
        }

        let mut slots: Vec<Option<Arc<dyn Component>>> = components.into_iter().map(Some).collect();
        let ordered = order.into_iter().filter_map(|i| slots[i].take()).collect();
        Ok(Graph { ordered })
    }

    /// Component names in start order
    pub fn order(&self) -> Vec<&str> {
        self.ordered.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Runs a [`Graph`] to completion
pub struct Runner {
    poll_interval: Duration,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start every component, wait for the first to finish or for `shutdown`,
    /// then stop all of them in reverse order
    ///
    /// Returns the first error: a start failure, a runtime failure, or
    /// failing that, a stop failure. A shutdown request or a component that
    /// finishes cleanly is not an error.
    pub fn run(&self, graph: &Graph, shutdown: &CancelToken) -> Result<(), RunError> {
        let mut started: Vec<&Arc<dyn Component>> = Vec::with_capacity(graph.len());
        for component in &graph.ordered {
            tracing::debug!(component = component.name(), "starting component");
            if let Err(source) = component.start() {
                let component_name = component.name().to_string();
                tracing::warn!(component = %component_name, error = %source, "start failed");
                // Stop errors are secondary to the start failure
                let _ = stop_reverse(&started);
                return Err(RunError::Start {
                    component: component_name,
                    source,
                });
            }
            started.push(component);
        }
        tracing::info!(components = started.len(), "all components started");

        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        let waiters: Vec<_> = started
            .iter()
            .map(|component| {
                let component = Arc::clone(component);
                let done_tx = done_tx.clone();
                thread::spawn(move || {
                    let result = component.wait();
                    let _ = done_tx.send((component.name().to_string(), result));
                })
            })
            .collect();
        drop(done_tx);

        let mut result = Ok(());
        loop {
            if shutdown.is_cancelled() {
                tracing::info!("shutdown requested");
                break;
            }
            match done_rx.recv_timeout(self.poll_interval) {
                Ok((name, Ok(()))) => {
                    tracing::info!(component = %name, "component finished");
                    break;
                }
                Ok((name, Err(source))) => {
                    tracing::warn!(component = %name, error = %source, "component failed");
                    result = Err(RunError::Failed {
                        component: name,
                        source,
                    });
                    break;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let stopped = stop_reverse(&started);
        for waiter in waiters {
            let _ = waiter.join();
        }
        result.and(stopped)
    }
}

/// Stop components last-started first, returning the first stop error
fn stop_reverse(started: &[&Arc<dyn Component>]) -> Result<(), RunError> {
    let mut first_error = None;
    for component in started.iter().rev() {
        tracing::debug!(component = component.name(), "stopping component");
        if let Err(source) = component.stop() {
            tracing::warn!(component = component.name(), error = %source, "stop failed");
            if first_error.is_none() {
                first_error = Some(RunError::Stop {
                    component: component.name().to_string(),
                    source,
                });
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}
