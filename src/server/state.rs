use std::sync::Arc;

use crate::config::Settings;
use crate::credit::CreditLedger;
use crate::health::HealthProber;
use crate::processor::ProcessorControl;
use crate::queue::{MessageSubmitter, QueueStore};
use crate::registry::BackendRegistry;
use crate::selector::BackendSelector;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn QueueStore>,
    pub ledger: Arc<dyn CreditLedger>,
    pub registry: Arc<BackendRegistry>,
    pub selector: Arc<BackendSelector>,
    pub submitter: Arc<MessageSubmitter>,
    pub processor_control: Arc<ProcessorControl>,
    pub prober: Arc<HealthProber>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        store: Arc<dyn QueueStore>,
        ledger: Arc<dyn CreditLedger>,
        registry: Arc<BackendRegistry>,
    ) -> Self {
        let selector = Arc::new(BackendSelector::new(registry.clone()));
        let submitter = Arc::new(MessageSubmitter::new(
            store.clone(),
            ledger.clone(),
            settings.bulk.max_batch_size,
            settings.processor.message_delay_ms,
        ));
        let processor_control = Arc::new(ProcessorControl::new(settings.processor.clone()));
        let prober = Arc::new(HealthProber::new(&settings.health));

        Self {
            settings: Arc::new(settings),
            store,
            ledger,
            registry,
            selector,
            submitter,
            processor_control,
            prober,
        }
    }
}
