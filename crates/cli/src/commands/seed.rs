use salesdesk_db::{connect_with_settings, migrations, DemoDataset, RetailRepositories, SeedResult};

use crate::commands::{current_thread_runtime, exit, load_config, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match current_thread_runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), exit::DATABASE))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), exit::WRITE))?;

        let repositories = RetailRepositories::sql(pool.clone());
        let seeded = DemoDataset::load(&repositories)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), exit::WRITE))?;

        let verification = DemoDataset::verify(&repositories)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), exit::VERIFICATION))?;

        let run_result = if verification.all_present {
            Ok(seeded)
        } else {
            Err(("seed_verification", verification_message(&verification.checks), exit::VERIFICATION))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(seeded: &SeedResult) -> String {
    format!(
        "demo dataset loaded: {} users, {} products, {} inventory rows, {} orders",
        seeded.users, seeded.products, seeded.inventory_rows, seeded.orders
    )
}

fn verification_message(checks: &[(&'static str, bool)]) -> String {
    let failed_checks =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
