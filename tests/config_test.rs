use feed_enricher::config::Settings;
use std::io::Write;
use tempfile::NamedTempFile;

fn base_config(agents: &str) -> String {
    format!(
        r#"
[miniflux]
base_url = "https://reader.example.com/"
api_key = "miniflux-key"

[llm]
base_url = "https://llm.example.com/v1/"
api_key = "llm-key"
model = "gpt-4o-mini"

{agents}
"#
    )
}

fn load(config: &str) -> feed_enricher::types::Result<Settings> {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(config.as_bytes()).expect("write config");
    Settings::load(file.path())
}

#[test]
fn minimal_config_loads_and_compiles() {
    let settings = load(&base_config(
        r#"
[[agents]]
name = "summary"
prompt = "Summarize the article."
template = "<blockquote>${content}</blockquote>"
allow_rules = ["EntryContentLength=gt:120"]
deny_rules = ["FeedSiteURL=bad\\.example"]
"#,
    ))
    .expect("valid config loads");

    let agents = settings.compile_agents().expect("rules compile");
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].name, "summary");
    // No webhook secret configured: sweeps run every minute.
    assert_eq!(settings.sweep_interval().as_secs(), 60);
}

#[test]
fn webhook_secret_relaxes_sweep_interval() {
    let mut config = base_config(
        r#"
[[agents]]
name = "summary"
prompt = "Summarize."
"#,
    );
    config = config.replace(
        "api_key = \"miniflux-key\"",
        "api_key = \"miniflux-key\"\nwebhook_secret = \"hook-secret\"",
    );
    let settings = load(&config).expect("valid config loads");
    assert_eq!(settings.sweep_interval().as_secs(), 15 * 60);
}

#[test]
fn duplicate_agent_ids_are_fatal() {
    let err = load(&base_config(
        r#"
[[agents]]
name = "summary"
prompt = "One."

[[agents]]
name = "summary"
prompt = "Two."
"#,
    ))
    .expect_err("duplicate ids rejected");
    assert!(err.to_string().contains("duplicate agent id"));
}

#[test]
fn malformed_rules_are_fatal_at_load() {
    let settings = load(&base_config(
        r#"
[[agents]]
name = "summary"
prompt = "Summarize."
allow_rules = ["EntryContentLength=between:200,50"]
"#,
    ))
    .expect("structure itself is valid");
    settings
        .compile_agents()
        .expect_err("inverted between bounds rejected");
}

#[test]
fn no_agents_is_fatal() {
    let err = load(&base_config("")).expect_err("agentless config rejected");
    assert!(err.to_string().contains("no agents"));
}

#[test]
fn legacy_agent_format_is_fatal() {
    let err = load(&base_config(
        r#"
[[agents]]
name = "summary"
prompt = "Summarize."
title = "Old style title"
"#,
    ))
    .expect_err("legacy keys rejected");
    assert!(err.to_string().contains("outdated"));
}

#[test]
fn bad_digest_schedule_is_fatal() {
    let err = load(&base_config(
        r#"
[digest]
schedule = ["25:99"]

[[agents]]
name = "summary"
prompt = "Summarize."
"#,
    ))
    .expect_err("invalid time rejected");
    assert!(err.to_string().contains("schedule"));
}
