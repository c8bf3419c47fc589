#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use ollama_pilot::config::{ServiceConfig, Settings};
use ollama_pilot::lifecycle::{LifecycleManager, LifecycleOptions};
use ollama_pilot::service::{HostServiceManager, ServiceController, ServiceError};
use ollama_pilot::transport::{
    ChatRequest, Completion, GenerateRequest, ModelDescriptor, ModelInfo, RunningModel, Transport,
    TransportError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Load,
    Unload,
    Generate,
    Chat,
    Show,
}

/// In-memory server: scripted failures per operation, call log, one resident model.
#[derive(Default)]
pub struct FakeTransport {
    models: Vec<ModelDescriptor>,
    failures: Mutex<HashMap<Op, VecDeque<TransportError>>>,
    pub loads: Mutex<Vec<String>>,
    pub unloads: Mutex<Vec<String>>,
    pub generates: Mutex<Vec<String>>,
    pub chats: Mutex<Vec<ChatRequest>>,
    pub list_calls: AtomicUsize,
    pub show_calls: AtomicUsize,
    details: HashMap<String, ModelInfo>,
    resident: Mutex<Option<String>>,
    unhealthy: AtomicBool,
    cancel_after: Mutex<Option<(usize, Arc<AtomicBool>)>>,
}

impl FakeTransport {
    pub fn with_models(names: &[&str]) -> Self {
        Self::with_descriptors(names.iter().map(|n| ModelDescriptor::named(*n)).collect())
    }

    pub fn with_descriptors(models: Vec<ModelDescriptor>) -> Self {
        Self {
            models,
            ..Default::default()
        }
    }

    /// What `/api/show` reports for `model`.
    pub fn with_details(mut self, model: &str, capabilities: &[&str], parameter_count: Option<u64>) -> Self {
        let mut info = ModelInfo {
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        };
        if let Some(count) = parameter_count {
            info.model_info
                .insert("general.parameter_count".to_string(), serde_json::Value::from(count));
        }
        self.details.insert(model.to_string(), info);
        self
    }

    /// The next calls of `op` fail with these errors, in order.
    pub fn fail(&self, op: Op, errors: Vec<TransportError>) {
        self.failures
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .extend(errors);
    }

    /// Sets `flag` once `count` generate calls have completed.
    pub fn cancel_after_generates(&self, count: usize, flag: Arc<AtomicBool>) {
        *self.cancel_after.lock().unwrap() = Some((count, flag));
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    pub fn loads(&self) -> Vec<String> {
        self.loads.lock().unwrap().clone()
    }

    pub fn unloads(&self) -> Vec<String> {
        self.unloads.lock().unwrap().clone()
    }

    pub fn generates(&self) -> Vec<String> {
        self.generates.lock().unwrap().clone()
    }

    fn next_failure(&self, op: Op) -> Result<(), TransportError> {
        match self.failures.lock().unwrap().get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn completion(text: &str) -> Completion {
        Completion {
            text: text.to_string(),
            done: true,
            done_reason: Some("stop".to_string()),
            total_duration: Some(2_000_000_000),
            load_duration: Some(100_000_000),
            eval_count: Some(40),
            eval_duration: Some(1_000_000_000),
        }
    }
}

pub fn refused() -> TransportError {
    TransportError::ConnectionRefused("http://localhost:11434".to_string())
}

pub fn timeout() -> TransportError {
    TransportError::Timeout("http://localhost:11434/api/generate".to_string())
}

pub fn status(code: u16) -> TransportError {
    TransportError::HttpStatus {
        code,
        body: format!("status {}", code),
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, TransportError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.next_failure(Op::List)?;
        Ok(self.models.clone())
    }

    async fn show_model(&self, model: &str) -> Result<ModelInfo, TransportError> {
        self.show_calls.fetch_add(1, Ordering::SeqCst);
        self.next_failure(Op::Show)?;
        Ok(self.details.get(model).cloned().unwrap_or_default())
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<Completion, TransportError> {
        self.generates.lock().unwrap().push(request.model.clone());
        let result = self.next_failure(Op::Generate);

        let done = self.generates.lock().unwrap().len();
        if let Some((count, flag)) = self.cancel_after.lock().unwrap().as_ref() {
            if done >= *count {
                flag.store(true, Ordering::SeqCst);
            }
        }

        result?;
        Ok(Self::completion(&format!(
            "<think>considering</think>Answer from {}",
            request.model
        )))
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Completion, TransportError> {
        self.chats.lock().unwrap().push(request.clone());
        self.next_failure(Op::Chat)?;
        Ok(Self::completion("Hello there"))
    }

    async fn load(&self, model: &str, _keep_alive: &str) -> Result<(), TransportError> {
        self.loads.lock().unwrap().push(model.to_string());
        self.next_failure(Op::Load)?;
        *self.resident.lock().unwrap() = Some(model.to_string());
        Ok(())
    }

    async fn unload(&self, model: &str) -> Result<(), TransportError> {
        self.unloads.lock().unwrap().push(model.to_string());
        self.next_failure(Op::Unload)?;
        let mut resident = self.resident.lock().unwrap();
        if resident.as_deref() == Some(model) {
            *resident = None;
        }
        Ok(())
    }

    async fn running_models(&self) -> Result<Vec<RunningModel>, TransportError> {
        Ok(self
            .resident
            .lock()
            .unwrap()
            .iter()
            .map(|name| RunningModel {
                name: name.clone(),
                size: 4_000_000_000,
                size_vram: 4_000_000_000,
                expires_at: None,
            })
            .collect())
    }

    async fn probe(&self) -> Result<(), TransportError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            Err(refused())
        } else {
            Ok(())
        }
    }

    async fn version(&self) -> Result<String, TransportError> {
        Ok("0.5.7".to_string())
    }
}

/// Host service that records restarts and answers from a script.
#[derive(Default)]
pub struct FakeServiceManager {
    results: Mutex<VecDeque<Result<(), ServiceError>>>,
    pub restarts: AtomicUsize,
}

impl FakeServiceManager {
    pub fn failing_with(err: ServiceError) -> Self {
        let fake = Self::default();
        fake.results.lock().unwrap().push_back(Err(err));
        fake
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostServiceManager for FakeServiceManager {
    async fn restart(&self, _unit: &str) -> Result<(), ServiceError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        self.results.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn is_active(&self, _unit: &str) -> bool {
        true
    }

    fn restart_command(&self, unit: &str) -> String {
        format!("sudo systemctl restart {}", unit)
    }
}

pub fn service_config() -> ServiceConfig {
    let mut config = Settings::embedded().unwrap().service;
    config.restart_timeout_secs = 5;
    config.poll_interval_ms = 100;
    config
}

pub fn manager(transport: Arc<FakeTransport>, host: Arc<FakeServiceManager>) -> LifecycleManager {
    let service = ServiceController::new(host, transport.clone(), service_config());
    let options = LifecycleOptions {
        retry_delay: Duration::from_millis(10),
        ..LifecycleOptions::default()
    };
    LifecycleManager::new(transport, service, options)
}
