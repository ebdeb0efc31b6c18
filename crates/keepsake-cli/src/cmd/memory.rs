//! Fact commands: remember, extract, context, decay.

use crate::cli::{PairArgs, SessionArgs};
use crate::{boot_memory, print_json, runtime};
use keepsake_kernel::background::DecayScheduler;
use keepsake_memory::extractor::{extract, matching_rules};
use keepsake_memory::spatial::{extract_updates, matching_state_rules};
use keepsake_types::config::MemoryConfig;
use keepsake_types::memory::DecayReport;

pub fn cmd_remember(config: MemoryConfig, pair: &PairArgs, message: &str, json: bool) {
    let memory = boot_memory(config);
    let (owner, companion) = pair.ids();
    let stored = runtime().block_on(memory.remember_user_message(&owner, &companion, message));

    if json {
        print_json(&serde_json::json!({ "stored": stored }));
    } else if stored == 0 {
        println!("Nothing to remember.");
    } else {
        println!("Remembered {stored} fact(s) for {owner} / {companion}.");
    }
}

pub fn cmd_extract(message: &str, reply: bool, json: bool) {
    if reply {
        let updates = extract_updates(message);
        if json {
            print_json(&updates);
        } else if updates.is_empty() {
            println!("No state changes found.");
        } else {
            println!("Rules: {}", matching_state_rules(message).join(", "));
            print_json(&updates);
        }
        return;
    }

    let drafts = extract(message, &"-".into(), &"-".into());
    if json {
        print_json(&drafts);
        return;
    }
    if drafts.is_empty() {
        println!("No facts found.");
        return;
    }
    let rules = matching_rules(message);
    println!("{:<20} {:<8} {:<13} {:<40} TAGS", "RULE", "KIND", "CATEGORY", "CONTENT");
    println!("{}", "-".repeat(96));
    for (rule, draft) in rules.iter().zip(&drafts) {
        let tags: Vec<&str> = draft.tags.iter().map(String::as_str).collect();
        println!(
            "{:<20} {:<8} {:<13} {:<40} {}",
            rule,
            draft.kind.as_str(),
            draft.category.as_str(),
            draft.content,
            tags.join(",")
        );
    }
}

pub fn cmd_context(config: MemoryConfig, session: &SessionArgs, json: bool) {
    let memory = boot_memory(config);
    let bundle = runtime().block_on(memory.context_for_turn(&session.key()));

    if json {
        print_json(&bundle);
    } else if bundle.is_empty() {
        println!("No memory for {}.", session.key());
    } else {
        print!("{}", bundle.render());
    }
}

pub fn cmd_decay(config: MemoryConfig, watch: bool, json: bool) {
    let memory = boot_memory(config);
    let rt = runtime();

    if watch {
        let scheduler = DecayScheduler::from_config(memory.decay_engine(), memory.config());
        rt.block_on(async {
            let (tx, rx) = tokio::sync::watch::channel(false);
            let handle = scheduler.spawn(rx);
            println!("Decay loop running. Press Ctrl+C to stop.");
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("Failed to listen for Ctrl+C: {e}");
            }
            let _ = tx.send(true);
            let _ = handle.await;
        });
        return;
    }

    match rt.block_on(memory.decay_now()) {
        Ok(report) if json => print_json(&report),
        Ok(report) => print_report(&report),
        Err(e) => {
            eprintln!("Decay pass failed: {e}");
            std::process::exit(1);
        }
    }
}

fn print_report(report: &DecayReport) {
    println!("Decay pass complete in {}ms", report.duration_ms);
    println!("  scanned: {}", report.scanned);
    println!("  updated: {}", report.updated);
    println!("  deleted: {}", report.deleted);
    if report.failed > 0 {
        println!("  failed:  {}", report.failed);
    }
}
