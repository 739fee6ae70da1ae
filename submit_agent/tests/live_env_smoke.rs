use std::env;
use submit_agent::{DecisionRequest, DecisionService, Observation, RemoteDecisionService};

fn run_live_tests() -> bool {
    matches!(
        env::var("RUN_LIVE_TESTS")
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// 1x1 white PNG.
const PIXEL_PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8/5+hHgAHggJ/PchI7wAAAABJRU5ErkJggg==";

#[tokio::test]
async fn live_decision_service_smoke() -> Result<(), Box<dyn std::error::Error>> {
    if !run_live_tests() {
        eprintln!("Skipping live decision service smoke test (RUN_LIVE_TESTS not enabled).");
        return Ok(());
    }

    let key = env::var("SUBMIT_DECISION_API_KEY")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .expect("RUN_LIVE_TESTS is enabled, but SUBMIT_DECISION_API_KEY is missing");
    let model = env::var("SUBMIT_DECISION_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

    let service = RemoteDecisionService::new(key, model);
    let observation =
        Observation::new(PIXEL_PNG).with_note("The page is blank. Reply with no actions and the text \"done\".");
    let decision = service
        .decide(&DecisionRequest {
            instruction: "You control a browser. Reply with JSON {\"actions\": [], \"text\": \"...\"}.",
            history: &[],
            observation: &observation,
        })
        .await?;

    assert!(decision.actions.is_empty() || !decision.text.is_empty());
    Ok(())
}
