use clap::{Arg, Command};
use log::LevelFilter;
use std::process;
use std::sync::Arc;

use onebox_sync::classify::{Classifier, LlmClassifier, RuleClassifier};
use onebox_sync::context::ContextStore;
use onebox_sync::imap::ImapTransport;
use onebox_sync::index::{ElasticIndex, IndexStore};
use onebox_sync::message::EmailAccount;
use onebox_sync::normalizer;
use onebox_sync::notify::{Notifier, WebhookNotifier};
use onebox_sync::transport::RawMessage;
use onebox_sync::{Config, Pipeline, SyncEngine, SyncSettings};

#[tokio::main]
async fn main() {
    let matches = Command::new("onebox-sync")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Multi-account mailbox synchronization and categorization engine")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/onebox-sync.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("test-email")
                .long("test-email")
                .value_name("FILE")
                .help("Categorize an RFC 822 email file offline and exit")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("suggest-reply")
                .long("suggest-reply")
                .value_name("FILE")
                .help("Generate a suggested reply for an RFC 822 email file and exit")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches.get_one::<String>("config").unwrap();
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        println!("🔍 Testing configuration...");
        println!("Accounts configured: {}", config.accounts.len());
        for account in &config.accounts {
            println!("  {} -> {}:{} ({})", account.id, account.host, account.port, account.user);
        }
        println!("Index: {} at {}", config.index.index, config.index.url);
        println!(
            "Remote classifier: {}",
            if config.classifier.api_key.is_empty() {
                "not configured (rule fallback only)"
            } else {
                "configured"
            }
        );
        match config.validate() {
            Ok(()) => println!("✅ Configuration is valid"),
            Err(e) => {
                println!("❌ Configuration validation failed: {e}");
                process::exit(1);
            }
        }
        return;
    }

    if let Some(email_file) = matches.get_one::<String>("test-email") {
        test_email_file(email_file);
        return;
    }

    if let Some(email_file) = matches.get_one::<String>("suggest-reply") {
        suggest_reply_for_file(&config, email_file).await;
        return;
    }

    run_engine(config).await;
}

async fn run_engine(config: Config) {
    log::info!("Starting onebox-sync...");

    let index = match ElasticIndex::new(&config.index) {
        Ok(index) => Arc::new(index),
        Err(e) => {
            eprintln!("Error setting up index client: {e}");
            process::exit(1);
        }
    };
    if let Err(e) = index.ensure_ready().await {
        eprintln!("Error initializing index: {e}");
        process::exit(1);
    }

    let classifier = match LlmClassifier::new(&config.classifier) {
        Ok(classifier) => Arc::new(classifier),
        Err(e) => {
            eprintln!("Error setting up classifier: {e}");
            process::exit(1);
        }
    };
    let notifier = match WebhookNotifier::new(&config.notifications) {
        Ok(notifier) => Arc::new(notifier),
        Err(e) => {
            eprintln!("Error setting up notifier: {e}");
            process::exit(1);
        }
    };

    let pipeline = Arc::new(Pipeline::new(
        index as Arc<dyn IndexStore>,
        classifier as Arc<dyn Classifier>,
        notifier as Arc<dyn Notifier>,
    ));
    let engine = SyncEngine::new(ImapTransport, pipeline, SyncSettings::from(&config.sync));

    if config.accounts.is_empty() {
        log::warn!("No email accounts configured; nothing to synchronize");
    } else {
        engine.start(&config.accounts);
    }

    log::info!("onebox-sync is running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Error waiting for shutdown signal: {e}");
    }
    engine.shutdown().await;
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file(path)
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(Config::default())
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

/// Offline pseudo-account for the file-based CLI verbs.
fn local_account() -> EmailAccount {
    EmailAccount {
        id: "local".to_string(),
        host: String::new(),
        port: 0,
        user: String::new(),
        password: String::new(),
        secure: false,
    }
}

fn read_email_file(path: &str) -> onebox_sync::Email {
    let source = match std::fs::read(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("❌ Error reading email file: {e}");
            process::exit(1);
        }
    };
    let raw = RawMessage {
        uid: 0,
        flags: Vec::new(),
        internal_date: None,
        source,
    };
    match normalizer::normalize(&local_account(), &raw) {
        Ok(email) => email,
        Err(e) => {
            eprintln!("❌ Error parsing email file: {e}");
            process::exit(1);
        }
    }
}

fn test_email_file(path: &str) {
    println!("🧪 Testing email file: {path}");
    let email = read_email_file(path);

    println!();
    println!("📧 Email details:");
    println!("   From: {}", email.from);
    println!("   To: {:?}", email.to);
    println!("   Subject: {}", email.subject);
    println!();

    let rules = match RuleClassifier::new() {
        Ok(rules) => rules,
        Err(e) => {
            eprintln!("❌ Error building rule classifier: {e}");
            process::exit(1);
        }
    };
    let body = if email.text_body.is_empty() {
        &email.body
    } else {
        &email.text_body
    };
    let text = format!("{} {}", email.subject, body);
    println!("🏷️  Category: {}", rules.classify_text(&text));
}

async fn suggest_reply_for_file(config: &Config, path: &str) {
    let email = read_email_file(path);
    let store = ContextStore::load(&config.context.path, &config.product);
    let classifier = match LlmClassifier::new(&config.classifier) {
        Ok(classifier) => classifier,
        Err(e) => {
            eprintln!("❌ Error setting up classifier: {e}");
            process::exit(1);
        }
    };

    let notes = store.relevant_context(&format!("{} {}", email.subject, email.text_body));
    let suggestion = classifier.suggest_reply(&email, &config.product, &notes).await;

    println!("💬 Suggested reply ({}, confidence {:.2}):", suggestion.context, suggestion.confidence);
    println!();
    println!("{}", suggestion.reply);
}
