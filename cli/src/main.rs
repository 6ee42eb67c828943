mod cli;

use std::sync::Arc;

use clap::Parser;

use cli::{Cli, Command};
use corelib::DlqResolutionStatus;
use scheduler::Scheduler;
use store::{Db, DlqRepository, RuleRepository, SqlxDlqRepository, SqlxRuleRepository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::init_tracing(false);

    let cli = Cli::parse();
    let db = Db::connect(&cli.database_url).await?;
    let pool = (*db.pool).clone();

    match cli.command {
        Command::Migrate => {
            db.migrate().await?;
            println!("migrations applied");
        }
        Command::Pause => {
            let rule_repo: Arc<dyn RuleRepository> = Arc::new(SqlxRuleRepository::new(pool));
            let scheduler = Scheduler::new(rule_repo);
            scheduler.deactivate_all().await?;
            println!("all schedules paused");
        }
        Command::Resume => {
            let rule_repo: Arc<dyn RuleRepository> = Arc::new(SqlxRuleRepository::new(pool));
            let scheduler = Scheduler::new(rule_repo);
            scheduler.reactivate_all().await?;
            println!("schedules resumed");
        }
        Command::DlqList { limit } => {
            let dlq_repo = SqlxDlqRepository::new(pool);
            let entries = dlq_repo.fetch_pending_review(limit).await?;
            if entries.is_empty() {
                println!("no entries pending review");
            }
            for entry in entries {
                println!(
                    "{} job={} attempts={} category={:?} created_at={}",
                    entry.id, entry.job_id, entry.total_attempts, entry.final_category, entry.created_at
                );
            }
        }
        Command::DlqResolve { id, discard } => {
            let dlq_repo = SqlxDlqRepository::new(pool);
            let resolution = if discard { DlqResolutionStatus::Discarded } else { DlqResolutionStatus::Resolved };
            dlq_repo.set_resolution(&id, resolution).await?;
            println!("{id} marked {resolution:?}");
        }
    }

    Ok(())
}
