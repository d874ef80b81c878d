use crate::commands::{connect, load_config, runtime, CommandResult, StepFailure};
use frontdesk_db::{migrations, practice_today, DemoPractice, SeedResult};

pub const DEFAULT_SEED_DAYS: u32 = 14;

pub fn run(days: u32) -> CommandResult {
    if days == 0 {
        return CommandResult::failure("seed", "invalid_argument", "--days must be at least 1", 2);
    }
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let clock = config.practice.clock();
    let first_day = practice_today(&clock);
    let result = runtime.block_on(async {
        let pool = connect(&config).await?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        let seeded: Result<SeedResult, StepFailure> =
            DemoPractice::load(&pool, first_day, days, &clock)
                .await
                .map_err(|error| ("seed_execution", error.to_string(), 6u8));
        pool.close().await;
        seeded
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary(&seeded, first_day, days)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(seeded: &SeedResult, first_day: chrono::NaiveDate, days: u32) -> String {
    format!(
        "demo practice loaded: {} providers, {} new slots over {days} days from {first_day}",
        seeded.providers_seeded, seeded.slots_seeded,
    )
}
