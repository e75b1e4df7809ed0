use crate::config::ServerConfig;
use crate::host::HostLauncher;
use crate::host::bridge::BridgeLauncher;
use crate::patch::service::PatchService;
use std::sync::Arc;

pub struct AppState {
    config: Arc<ServerConfig>,
    service: Arc<PatchService>,
}

impl AppState {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let launcher = init_host_launcher(&config);
        Self::new_with_launcher(config, launcher)
    }

    /// Build state around an explicit launcher (tests inject a fake host here).
    pub fn new_with_launcher(
        config: Arc<ServerConfig>,
        launcher: Option<Arc<dyn HostLauncher>>,
    ) -> Self {
        let service = Arc::new(PatchService::new(config.clone(), launcher));
        Self { config, service }
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }

    pub fn service(&self) -> Arc<PatchService> {
        self.service.clone()
    }
}

fn init_host_launcher(config: &ServerConfig) -> Option<Arc<dyn HostLauncher>> {
    let command = config.host_bridge_command.as_ref()?;
    let launcher: Arc<dyn HostLauncher> = Arc::new(BridgeLauncher::new(
        command.clone(),
        config.host_bridge_args.clone(),
    ));
    let availability = launcher.availability();
    if availability.available {
        tracing::info!(command = %command.display(), "host automation bridge configured");
    } else {
        tracing::warn!(
            command = %command.display(),
            reason = availability.reason.as_deref().unwrap_or("unknown"),
            "host automation bridge not available"
        );
    }
    Some(launcher)
}
