use convoy_db::{connect_with_settings, migrations, DemoFleetDataset, SqlFleetStore};

use crate::commands::{exit, load_config, runtime, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), exit::DB_CONNECTIVITY))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), exit::PERSISTENCE))?;

        let store = SqlFleetStore::new(pool.clone());
        let seeded = DemoFleetDataset::load(&store)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), exit::PERSISTENCE))?;
        let verification = DemoFleetDataset::verify(&store)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), exit::SEED_VERIFICATION))?;

        let failed_checks = verification
            .checks
            .iter()
            .filter_map(|(check, passed)| (!passed).then_some(*check))
            .collect::<Vec<_>>();
        pool.close().await;

        if verification.all_present {
            Ok(seeded)
        } else {
            let message = verification_message(&failed_checks);
            Err(("seed_verification", message, exit::SEED_VERIFICATION))
        }
    });

    match result {
        Ok(seeded) => CommandResult::success(
            "seed",
            format!(
                "demo fleet ready: {} users, {} trips ({} created this run)",
                seeded.users_seeded,
                DemoFleetDataset::EXPECTED_TRIPS,
                seeded.trips_created,
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
