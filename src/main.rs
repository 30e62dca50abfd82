use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use prompt_enhancer::config::Config;
use prompt_enhancer::error::Error;
use prompt_enhancer::frameworks::FrameworkCatalog;
use prompt_enhancer::http_client::ReqwestHttpClient;
use prompt_enhancer::message_router::{InboundMessage, MessageRouter, Response};
use prompt_enhancer::orchestrator::EnhancementRequest;
use prompt_enhancer::progress::{NoopListener, OutboundEvent};
use prompt_enhancer::provider_registry::{ProviderRegistry, provider_for_model};
use prompt_enhancer::settings::{JsonFileBackend, Settings, SettingsStore};
use serde_json::{Value, json};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("enhance")
        .about("Rewrite a prompt through prompt-engineering frameworks")
        .long_about("enhance applies each selected framework (cot, react, tot, ...) to your text with the configured LLM provider and prints one enhanced prompt per framework")
        .arg(Arg::new("text")
            .help("The prompt to enhance")
            .num_args(1..))
        .arg(Arg::new("framework")
            .short('f')
            .long("framework")
            .help("Framework to apply for this run (repeatable, overrides the selected ones)")
            .value_name("FRAMEWORK")
            .action(ArgAction::Append))
        .arg(Arg::new("test-connection")
            .long("test-connection")
            .help("Test an API key against a provider")
            .value_name("PROVIDER")
            .requires("api-key"))
        .arg(Arg::new("api-key")
            .long("api-key")
            .help("API key used by --test-connection")
            .value_name("API_KEY"))
        .arg(Arg::new("set-api-key")
            .long("set-api-key")
            .help("Store an API key for a provider")
            .num_args(2)
            .value_names(["PROVIDER", "API_KEY"]))
        .arg(Arg::new("select-model")
            .long("select-model")
            .help("Select the model enhancements run against")
            .value_name("MODEL"))
        .arg(Arg::new("select-frameworks")
            .long("select-frameworks")
            .help("Select the default frameworks, comma separated")
            .value_name("FRAMEWORKS")
            .value_delimiter(','))
        .arg(Arg::new("max-tokens")
            .long("max-tokens")
            .help("Store the maximum output tokens (1-100000)")
            .value_parser(value_parser!(u64)))
        .arg(Arg::new("temperature")
            .long("temperature")
            .help("Store the sampling temperature (0-1)")
            .value_parser(value_parser!(f64)))
        .arg(Arg::new("list-frameworks")
            .long("list-frameworks")
            .help("List available frameworks")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("list-models")
            .long("list-models")
            .help("List supported providers and models")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("config")
            .long("config")
            .help("Show configuration information")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("json")
            .long("json")
            .help("Print raw JSON responses and events")
            .action(ArgAction::SetTrue))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    let json_output = matches.get_flag("json");

    if matches.get_flag("config") {
        Config::show_config_info()?;
        return Ok(ExitCode::SUCCESS);
    }

    if matches.get_flag("list-frameworks") {
        let frameworks = FrameworkCatalog::builtin().list_frameworks();
        if json_output {
            println!("{}", serde_json::to_string_pretty(&frameworks)?);
        } else {
            for framework in frameworks {
                println!("{:<18} {} - {}", framework.id.as_str(), framework.name, framework.description);
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let config = Config::load()?;
    let registry = if config.is_mock_mode() {
        info!("Mock mode enabled, using offline providers");
        ProviderRegistry::mock()
    } else {
        let http = ReqwestHttpClient::with_timeout(config.request_timeout())?;
        ProviderRegistry::with_default_clients(Arc::new(http))
    };

    if matches.get_flag("list-models") {
        let descriptors = registry.descriptors();
        if json_output {
            println!("{}", serde_json::to_string_pretty(&descriptors)?);
        } else {
            for descriptor in descriptors {
                println!("{} ({})", descriptor.display_name, descriptor.id);
                for model in descriptor.models {
                    println!("  {:<32} {}", model.id, model.name);
                }
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let store = SettingsStore::load(JsonFileBackend::new(config.settings_path()))?;
    store.set_api_key_overrides(Config::env_api_keys());
    let router = MessageRouter::new(Arc::new(store), Arc::new(registry));

    if let Some(service) = matches.get_one::<String>("test-connection") {
        let message = InboundMessage::TestConnection {
            service: service.clone(),
            api_key: matches.get_one::<String>("api-key").cloned().unwrap_or_default(),
        };
        let response = router.route_message(message, &NoopListener).await;
        return Ok(report(&response, json_output, |response| {
            println!("✅ Connection successful: {}", response.response.as_deref().unwrap_or_default());
        }));
    }

    match settings_payload(&matches, &router.settings().stored()) {
        Ok(Some(data)) => {
            let response = router
                .route_message(InboundMessage::SettingsUpdated { data }, &NoopListener)
                .await;
            let saved = report(&response, json_output, |_| println!("✅ Settings saved"));
            if !response.success || !matches.contains_id("text") {
                return Ok(saved);
            }
        }
        Ok(None) => {}
        Err(e) => return Ok(report(&Response::failure(&e), json_output, |_| {})),
    }

    let text: Vec<String> = matches
        .get_many::<String>("text")
        .unwrap_or_default()
        .cloned()
        .collect();
    if text.is_empty() {
        eprintln!("No text provided. Use 'enhance --help' for usage information.");
        return Ok(ExitCode::FAILURE);
    }

    let mut request = EnhancementRequest::new(text.join(" "));
    if let Some(frameworks) = matches.get_many::<String>("framework") {
        request = request.with_frameworks(frameworks.cloned());
    }

    let listener = move |event: OutboundEvent| print_event(&event, json_output);
    let response = router
        .route_message(InboundMessage::EnhancePrompt(request), &listener)
        .await;
    Ok(report(&response, json_output, print_enhancements))
}

/// Builds a `SETTINGS_UPDATED` payload from the stored settings and any settings
/// flags. `None` when no settings flag was given.
fn settings_payload(matches: &ArgMatches, stored: &Settings) -> Result<Option<Value>, Error> {
    let api_key: Option<Vec<&String>> = matches.get_many::<String>("set-api-key").map(Iterator::collect);
    let model = matches.get_one::<String>("select-model");
    let frameworks: Option<Vec<&String>> = matches.get_many::<String>("select-frameworks").map(Iterator::collect);
    let max_tokens = matches.get_one::<u64>("max-tokens");
    let temperature = matches.get_one::<f64>("temperature");

    if api_key.is_none() && model.is_none() && frameworks.is_none() && max_tokens.is_none() && temperature.is_none() {
        return Ok(None);
    }

    let mut api_keys = stored.api_keys.clone();
    if let Some([provider, key]) = api_key.as_deref() {
        api_keys.insert(provider.to_string(), key.to_string());
    }

    let selected_model = match model {
        Some(model) => json!({"provider": provider_for_model(model)?.as_str(), "modelId": model}),
        None => match stored.selected_models.iter().next() {
            Some((provider, model)) => json!({"provider": provider, "modelId": model}),
            None => Value::Null,
        },
    };

    let selected_frameworks = match frameworks {
        Some(frameworks) => json!(frameworks),
        None => json!(stored.selected_frameworks),
    };

    let params = stored.generation_params;
    let advanced_settings = json!({
        "maxTokens": max_tokens.copied().unwrap_or(u64::from(params.max_tokens)),
        "temperature": temperature.copied().unwrap_or(params.temperature),
    });

    Ok(Some(json!({
        "apiKeys": api_keys,
        "selectedModel": selected_model,
        "selectedFrameworks": selected_frameworks,
        "advancedSettings": advanced_settings,
    })))
}

fn print_event(event: &OutboundEvent, json_output: bool) {
    if json_output {
        if let Ok(line) = serde_json::to_string(event) {
            eprintln!("{line}");
        }
        return;
    }
    if let Some(progress) = event.progress() {
        let step = serde_json::to_value(progress.step)
            .ok()
            .and_then(|step| step.as_str().map(str::to_string))
            .unwrap_or_default();
        match &progress.detail {
            Some(detail) => eprintln!("⏳ {step}: {detail}"),
            None => eprintln!("⏳ {step}"),
        }
    }
}

fn print_enhancements(response: &Response) {
    let Some(data) = &response.data else { return };
    for enhanced in data["enhanced"].as_array().into_iter().flatten() {
        println!(
            "── {} ({} / {}) ──",
            enhanced["framework"].as_str().unwrap_or_default(),
            enhanced["service"].as_str().unwrap_or_default(),
            enhanced["model"].as_str().unwrap_or_default(),
        );
        println!("{}\n", enhanced["enhanced"].as_str().unwrap_or_default());
    }
    for failure in data["failures"].as_array().into_iter().flatten() {
        eprintln!(
            "⚠️  {} failed: {}",
            failure["framework"].as_str().unwrap_or_default(),
            failure["reason"].as_str().unwrap_or_default(),
        );
    }
}

/// Prints `response` and maps it to the process exit code.
fn report(response: &Response, json_output: bool, on_success: impl Fn(&Response)) -> ExitCode {
    if json_output {
        match serde_json::to_string_pretty(response) {
            Ok(body) => println!("{body}"),
            Err(e) => eprintln!("❌ {e}"),
        }
    } else if response.success {
        on_success(response);
    } else {
        eprintln!("❌ {}", response.error.as_deref().unwrap_or("Unknown error"));
    }

    if response.success { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
