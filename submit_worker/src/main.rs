use std::sync::Arc;
use submit_agent::{
    ApprovalRequest, ChromeSessionFactory, ConversationController, EventLog, EvidenceCapturer,
    FsEvidenceStore, HttpCaptchaSolver, HttpQueueClient, Orchestrator, RemoteDecisionService,
    SafetyGate, TargetCatalog, Viewport, WorkerConfig,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};

/// Answer channel approvals from the terminal.
async fn console_approver(mut requests: mpsc::Receiver<ApprovalRequest>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut out = tokio::io::stderr();

    while let Some(pending) = requests.recv().await {
        let prompt = format!(
            "\n[approve] {} wants to run `{}`: {}\nAllow? [y/N] ",
            pending.request.target_id, pending.request.action.kind, pending.request.explanation
        );
        let _ = out.write_all(prompt.as_bytes()).await;
        let _ = out.flush().await;

        let approved = match lines.next_line().await {
            Ok(Some(line)) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            _ => false,
        };
        // the gate may have timed out already
        let _ = pending.respond.send(approved);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = WorkerConfig::from_env()?;
    log::info!(
        "starting {} against {} (policy {:?})",
        config.worker_id,
        config.queue_url,
        config.safety.policy
    );

    let decision = Arc::new(
        RemoteDecisionService::new(&config.decision_api_key, &config.decision_model)
            .with_api_url(&config.decision_url)
            .with_timeout(config.http_timeout),
    );

    let events = Arc::new(match &config.event_log_path {
        Some(path) => EventLog::jsonl(path),
        None => EventLog::disabled(),
    });

    let (gate, approvals) = SafetyGate::from_config(&config.safety);
    if let Some(requests) = approvals {
        tokio::spawn(console_approver(requests));
    }

    let evidence = EvidenceCapturer::new(Arc::new(FsEvidenceStore::new(&config.evidence_dir)));
    let mut controller =
        ConversationController::new(decision, evidence, gate, config.controller_config())
            .with_events(events.clone());

    match &config.solver_key {
        Some(key) => {
            let solver = Arc::new(HttpCaptchaSolver::new(&config.solver_url, key));
            controller = controller.with_solver(solver);
        }
        None => log::warn!("SUBMIT_SOLVER_KEY not set; challenges will fail their target"),
    }

    let catalog = TargetCatalog::load(&config.catalog_path).await?;
    let sessions = Arc::new(ChromeSessionFactory::launch(config.headless, Viewport::default()).await?);
    let queue = Arc::new(
        HttpQueueClient::new(&config.queue_url, &config.worker_id)
            .with_token(Some(config.queue_token.clone()))
            .with_timeout(config.http_timeout),
    );

    let orchestrator = Orchestrator::new(
        queue,
        catalog,
        sessions,
        controller,
        config.orchestrator_config(),
    )
    .with_events(events);

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("shutdown requested, finishing the current job");
            let _ = stop.send(true);
        }
    });

    orchestrator.run_forever(shutdown).await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    env_logger::init();

    if let Err(e) = run().await {
        log::error!("worker failed: {}", e);
        std::process::exit(1);
    }
}
