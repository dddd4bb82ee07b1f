//! CPA Exam Benchmark CLI

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cpa_benchmark::{
    backends::BackendResources,
    config::Config,
    providers::{authenticate, create_local_client, Embedder, LLMProvider},
    questions::{expand_with_layout, load_questions, QuestionSet, Subject},
    reporting::print_console_report,
    retrieval::{load_corpus, DocumentQa, DocumentSearch},
    runner::{retrieval_label, summarize, Sweep},
};

#[derive(Parser)]
#[command(name = "cpa-benchmark")]
#[command(about = "True/false benchmark of LLMs on the Japanese CPA exam")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer every configured (subject, year, model, retrieval) cell and score it
    Run {
        /// Comma-separated subjects (default: all configured)
        #[arg(short, long)]
        subjects: Option<String>,

        /// Comma-separated models (default: from config)
        #[arg(short, long)]
        models: Option<String>,

        /// Comma-separated retrieval modes, e.g. "false,true" (default: from config)
        #[arg(long)]
        retrieval: Option<String>,

        /// Result directory (default: from config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Recompute summaries from existing result files
    Score {
        /// Comma-separated subjects (default: all configured)
        #[arg(short, long)]
        subjects: Option<String>,

        /// Result directory (default: from config)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Skip checking stored expected verdicts against the question tables
        #[arg(long)]
        no_verify: bool,
    },

    /// Write the composed prompts of every question to text files for review
    DumpPrompts {
        /// Output directory for prompt files
        #[arg(short, long, default_value = "result/prompts")]
        output: PathBuf,

        /// Comma-separated subjects (default: all configured)
        #[arg(short, long)]
        subjects: Option<String>,
    },

    /// Show the years and question counts of the question tables
    ListQuestions {
        /// Comma-separated subjects (default: all)
        #[arg(short, long)]
        subjects: Option<String>,
    },

    /// Generate sample configuration
    InitConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config/cpa.toml")]
        output: PathBuf,
    },

    /// Verify the API key and the local model server
    CheckAuth {
        /// Also check the local OpenAI-compatible server
        #[arg(long)]
        local: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("cpa_benchmark=debug,info")
    } else {
        EnvFilter::new("cpa_benchmark=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load_or_default(),
    };

    match cli.command {
        Commands::Run {
            subjects,
            models,
            retrieval,
            output,
        } => {
            run_benchmark(config, subjects, models, retrieval, output).await?;
        }

        Commands::Score {
            subjects,
            input,
            no_verify,
        } => {
            score_results(config, subjects, input, no_verify)?;
        }

        Commands::DumpPrompts { output, subjects } => {
            dump_prompts(&config, output, subjects)?;
        }

        Commands::ListQuestions { subjects } => {
            list_questions(&config, subjects)?;
        }

        Commands::InitConfig { output } => {
            init_config(output)?;
        }

        Commands::CheckAuth { local } => {
            check_auth(&config, local).await?;
        }
    }

    Ok(())
}

fn split_list(arg: &str) -> Vec<String> {
    arg.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Subjects named on the command line, or every subject with configured years
fn select_subjects(config: &Config, arg: Option<String>) -> Result<Vec<Subject>, Box<dyn std::error::Error>> {
    match arg {
        Some(list) => Ok(split_list(&list)
            .iter()
            .map(|s| s.parse::<Subject>())
            .collect::<Result<Vec<_>, _>>()?),
        None => Ok(config.subjects()),
    }
}

fn load_question_sets(
    config: &Config,
    subjects: &[Subject],
) -> Result<BTreeMap<Subject, QuestionSet>, Box<dyn std::error::Error>> {
    let mut sets = BTreeMap::new();
    for &subject in subjects {
        let set = load_questions(&config.paths.data_dir, subject)?;
        tracing::info!(
            "Loaded {} {} questions ({} excluded)",
            set.len(),
            subject,
            set.excluded
        );
        sets.insert(subject, set);
    }
    Ok(sets)
}

async fn run_benchmark(
    mut config: Config,
    subjects_arg: Option<String>,
    models_arg: Option<String>,
    retrieval_arg: Option<String>,
    output_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(models) = models_arg {
        config.sweep.models = split_list(&models);
    }
    if let Some(modes) = retrieval_arg {
        config.sweep.retrieval_modes = split_list(&modes)
            .iter()
            .map(|m| m.to_lowercase().parse::<bool>())
            .collect::<Result<Vec<_>, _>>()?;
    }
    if let Some(dir) = output_dir {
        config.paths.result_dir = dir;
    }
    let subjects = select_subjects(&config, subjects_arg)?;
    config.sweep.years.retain(|s, _| subjects.contains(s));

    println!("=== CPA Exam Benchmark ===");
    println!("Models:    {}", config.sweep.models.join(", "));
    println!(
        "Subjects:  {}",
        subjects.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
    );
    println!(
        "Retrieval: {}",
        config
            .sweep
            .retrieval_modes
            .iter()
            .map(|r| retrieval_label(*r))
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("Results:   {}", config.paths.result_dir.display());
    println!();

    let question_sets = load_question_sets(&config, &subjects)?;
    let resources = build_resources(&config).await?;

    let sweep = Sweep::new(&config, resources);
    let outcome = sweep.run(&question_sets).await?;

    for table in &outcome.summaries {
        let title = format!(
            "{} (rag {}) -> {}",
            table.subject,
            retrieval_label(table.retrieval),
            table.path.display()
        );
        print_console_report(&title, &table.rows);
    }

    println!(
        "\n{} runs completed, {} failed",
        outcome.completed.len(),
        outcome.failed.len()
    );
    for (key, error) in &outcome.failed {
        println!("  {}: {}", key, error);
    }
    Ok(())
}

/// Clients and document tools needed by the configured sweep
async fn build_resources(config: &Config) -> Result<BackendResources, Box<dyn std::error::Error>> {
    let needs_api = config.sweep.models.iter().any(|m| config.is_api_model(m));
    let needs_tools = needs_api && config.sweep.retrieval_modes.contains(&true);

    let api = if needs_api {
        Some(Arc::new(authenticate(config).await?))
    } else {
        None
    };

    let mut tools: Vec<Arc<dyn DocumentSearch>> = Vec::new();
    if let (true, Some(client)) = (needs_tools, &api) {
        let embedder: Arc<dyn Embedder> = client.clone();
        let answerer: Arc<dyn LLMProvider> = client.clone();
        for document in load_corpus(&config.paths.corpus_dir)? {
            let tool = DocumentQa::new(document, embedder.clone(), answerer.clone(), &config.sweep.sub_model)
                .with_top_k(config.retrieval.top_k)
                .with_max_tokens(config.sweep.max_output_tokens);
            tools.push(Arc::new(tool));
        }
    }

    Ok(BackendResources {
        api: api.map(|c| c as Arc<dyn LLMProvider>),
        local: Arc::new(create_local_client(config)),
        tools,
    })
}

fn score_results(
    mut config: Config,
    subjects_arg: Option<String>,
    input: Option<PathBuf>,
    no_verify: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(dir) = input {
        config.paths.result_dir = dir;
    }
    let subjects = select_subjects(&config, subjects_arg)?;
    let question_sets = if no_verify {
        BTreeMap::new()
    } else {
        load_question_sets(&config, &subjects)?
    };

    for &retrieval in &config.sweep.retrieval_modes {
        for &subject in &subjects {
            let table = summarize(&config, subject, retrieval, question_sets.get(&subject))?;
            let title = format!(
                "{} (rag {}) -> {}",
                subject,
                retrieval_label(retrieval),
                table.path.display()
            );
            print_console_report(&title, &table.rows);
        }
    }
    Ok(())
}

fn list_questions(config: &Config, subjects_arg: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let subjects = match subjects_arg {
        Some(_) => select_subjects(config, subjects_arg)?,
        None => Subject::all(),
    };

    println!("Question tables in {}:\n", config.paths.data_dir.display());
    for (subject, set) in load_question_sets(config, &subjects)? {
        println!(
            "{} ({}): {} questions, {} excluded, layout {:?}",
            subject,
            subject.data_file(),
            set.len(),
            set.excluded,
            config.layout_for(subject)
        );
        let configured = config.years_for(subject);
        for year in set.years() {
            let marker = if configured.contains(&year) { "*" } else { " " };
            println!("  {} {:<8} {:>4}", marker, year, set.for_year(&year).count());
        }
    }
    println!("\n* = included in the configured sweep");
    Ok(())
}

fn init_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    // Ensure parent directory exists
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    config.save_toml(&output)?;
    println!("Configuration written to: {}", output.display());
    Ok(())
}

fn dump_prompts(
    config: &Config,
    output_dir: PathBuf,
    subjects_arg: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let subjects = select_subjects(config, subjects_arg)?;
    let sets = load_question_sets(config, &subjects)?;
    std::fs::create_dir_all(&output_dir)?;

    println!("=== Dumping Prompts ===");
    println!("Output: {}", output_dir.display());
    println!();

    let mut files = 0;
    for (subject, set) in &sets {
        let layout = config.layout_for(*subject);
        for year in config.years_for(*subject) {
            let mut content = format!(
                "=== {} {} ({:?}) ===\nSystem: {}\n{}\n",
                subject,
                year,
                layout,
                config.prompts.system,
                "=".repeat(50)
            );
            let mut units = 0;
            for (i, question) in set.for_year(year).enumerate() {
                content.push_str(&format!("\n--- q{} (a_no {}) ---\n", i, question.answer_number));
                match expand_with_layout(question, layout) {
                    Ok(expanded) => {
                        for unit in expanded {
                            content.push_str(&format!(
                                "{}{}\n{}\n[expected: {}]\n\n",
                                config.prompts.pre_question,
                                unit.text,
                                config.prompts.post_question,
                                cpa_benchmark::questions::format_expected(unit.expected)
                            ));
                            units += 1;
                        }
                    }
                    Err(e) => {
                        content.push_str(&format!("[skipped: {}]\n", e));
                        eprintln!("  [ERROR] {} {} q{}: {}", subject, year, i, e);
                    }
                }
            }

            let filename = format!("{}_{}.txt", subject, year);
            std::fs::write(output_dir.join(&filename), &content)?;
            println!("  {} {} -> {} ({} prompts)", subject, year, filename, units);
            files += 1;
        }
    }

    println!("\nDone. {} files written to {}", files, output_dir.display());
    Ok(())
}

async fn check_auth(config: &Config, local: bool) -> Result<(), Box<dyn std::error::Error>> {
    let client = authenticate(config).await?;
    let (rpm, tpm) = client.rate_limiter().limits();
    let models = client.list_models().await?;
    println!("API key from {} accepted by {}", config.provider.api_key_env, config.provider.base_url);
    println!("Limits: {} requests/min, {} tokens/min", rpm, tpm);
    for model in config.sweep.models.iter().filter(|m| config.is_api_model(m)) {
        let status = if models.contains(model) { "available" } else { "NOT LISTED" };
        println!("  {:<32} {}", model, status);
    }

    if local {
        let server = create_local_client(config);
        match server.health_check().await {
            Ok(true) => println!("Local server {} is reachable", config.local.base_url),
            Ok(false) => println!("Local server {} did not respond", config.local.base_url),
            Err(e) => println!("Local server {}: {}", config.local.base_url, e),
        }
    }
    Ok(())
}
