// src/gateway/mock.rs
// In-process mock provider: canned catalog, instant provisioning,
// plus knobs for injecting latency and failures in tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use uuid::Uuid;

use super::{GatewayError, GatewayResult, ProvisioningGateway};
use crate::models::{GpuType, Instance, InstanceStatus, ResourceHints};

fn gpu(id: &str, name: &str, memory: &str, cc: &str, price: f64) -> GpuType {
    GpuType {
        id: id.to_string(),
        name: name.to_string(),
        memory: memory.to_string(),
        compute_capability: cc.to_string(),
        price_per_hour: price,
        available: true,
    }
}

/// The catalog served in mock mode
pub fn default_catalog() -> Vec<GpuType> {
    vec![
        gpu("nvidia-t4", "NVIDIA Tesla T4", "16GB", "7.5", 0.50),
        gpu("nvidia-v100", "NVIDIA Tesla V100", "32GB", "7.0", 2.00),
        gpu("nvidia-a100-40gb", "NVIDIA A100 40GB", "40GB", "8.0", 3.50),
        gpu("nvidia-a100-80gb", "NVIDIA A100 80GB", "80GB", "8.0", 4.50),
        gpu("nvidia-h100", "NVIDIA H100", "80GB", "9.0", 5.00),
        gpu("nvidia-l4", "NVIDIA L4", "24GB", "8.9", 1.00),
    ]
}

/// Snapshot of how often each capability was invoked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayCalls {
    pub provision: usize,
    pub status: usize,
    pub stop: usize,
    pub delete: usize,
}

impl GatewayCalls {
    pub fn teardown(&self) -> usize {
        self.stop + self.delete
    }
}

#[derive(Default)]
struct Counters {
    provision: AtomicUsize,
    status: AtomicUsize,
    stop: AtomicUsize,
    delete: AtomicUsize,
}

pub struct MockGateway {
    catalog: Vec<GpuType>,
    instances: Mutex<HashMap<String, Instance>>,
    provision_delay: Mutex<Duration>,
    fail_provision: AtomicBool,
    fail_teardown: AtomicBool,
    counters: Counters,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self::with_catalog(default_catalog())
    }

    pub fn with_catalog(catalog: Vec<GpuType>) -> Self {
        Self {
            catalog,
            instances: Mutex::new(HashMap::new()),
            provision_delay: Mutex::new(Duration::ZERO),
            fail_provision: AtomicBool::new(false),
            fail_teardown: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    pub fn set_provision_delay(&self, delay: Duration) {
        *self.provision_delay.lock() = delay;
    }

    pub fn set_fail_provision(&self, fail: bool) {
        self.fail_provision.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_teardown(&self, fail: bool) {
        self.fail_teardown.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> GatewayCalls {
        GatewayCalls {
            provision: self.counters.provision.load(Ordering::SeqCst),
            status: self.counters.status.load(Ordering::SeqCst),
            stop: self.counters.stop.load(Ordering::SeqCst),
            delete: self.counters.delete.load(Ordering::SeqCst),
        }
    }

    pub fn catalog(&self) -> &[GpuType] {
        &self.catalog
    }

    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn instances(&self) -> Vec<Instance> {
        let mut instances: Vec<Instance> = self.instances.lock().values().cloned().collect();
        instances.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        instances
    }

    /// Create an instance immediately in `running` state
    pub fn create_instance(
        &self,
        gpu_type: &str,
        gpu_count: u32,
        hints: &ResourceHints,
    ) -> GatewayResult<Instance> {
        if !self.catalog.iter().any(|g| g.id == gpu_type) {
            let available: Vec<&str> = self.catalog.iter().map(|g| g.id.as_str()).collect();
            return Err(GatewayError::Rejected {
                status: 400,
                message: format!("Invalid GPU type. Available types: {}", available.join(", ")),
            });
        }

        let mut rng = rand::rng();
        let simple = Uuid::new_v4().simple().to_string();
        let instance = Instance {
            instance_id: format!("inst-{}", &simple[..12]),
            gpu_type: gpu_type.to_string(),
            gpu_count,
            cpu_cores: hints.cpu_cores,
            ram_gb: hints.ram_gb,
            status: InstanceStatus::Running,
            ip_address: Some(format!(
                "192.168.{}.{}",
                rng.random_range(1..=254),
                rng.random_range(1..=254)
            )),
        };

        self.instances
            .lock()
            .insert(instance.instance_id.clone(), instance.clone());
        Ok(instance)
    }

    pub fn find_instance(&self, instance_id: &str) -> GatewayResult<Instance> {
        self.instances
            .lock()
            .get(instance_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(instance_id.to_string()))
    }

    /// Strict stop: unknown ids are an error (the HTTP mock reports 404)
    pub fn stop_instance(&self, instance_id: &str) -> GatewayResult<Instance> {
        let mut instances = self.instances.lock();
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| GatewayError::NotFound(instance_id.to_string()))?;
        instance.status = InstanceStatus::Stopped;
        Ok(instance.clone())
    }

    /// Strict delete: unknown ids are an error
    pub fn remove_instance(&self, instance_id: &str) -> GatewayResult<Instance> {
        self.instances
            .lock()
            .remove(instance_id)
            .ok_or_else(|| GatewayError::NotFound(instance_id.to_string()))
    }

    fn check_teardown(&self) -> GatewayResult<()> {
        if self.fail_teardown.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 500,
                message: "injected teardown failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ProvisioningGateway for MockGateway {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn list_gpu_types(&self) -> GatewayResult<Vec<GpuType>> {
        Ok(self.catalog.clone())
    }

    async fn provision(
        &self,
        gpu_type: &str,
        gpu_count: u32,
        hints: &ResourceHints,
    ) -> GatewayResult<Instance> {
        self.counters.provision.fetch_add(1, Ordering::SeqCst);

        let delay = *self.provision_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_provision.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 503,
                message: "injected provisioning failure".to_string(),
            });
        }

        self.create_instance(gpu_type, gpu_count, hints)
    }

    async fn get_status(&self, instance_id: &str) -> GatewayResult<Instance> {
        self.counters.status.fetch_add(1, Ordering::SeqCst);
        self.find_instance(instance_id)
    }

    async fn stop(&self, instance_id: &str) -> GatewayResult<()> {
        self.counters.stop.fetch_add(1, Ordering::SeqCst);
        self.check_teardown()?;
        match self.stop_instance(instance_id) {
            Ok(_) | Err(GatewayError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, instance_id: &str) -> GatewayResult<()> {
        self.counters.delete.fetch_add(1, Ordering::SeqCst);
        self.check_teardown()?;
        match self.remove_instance(instance_id) {
            Ok(_) | Err(GatewayError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
