use docgenie_db::{connect_from_config, ConnectorRepository, SqlConnectorRepository};

use crate::commands::{prepare, CommandResult};

/// Lists stored registrations. Unknown connector types are listed too; the
/// server skips them at startup.
pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("connectors") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let repository = SqlConnectorRepository::new(pool.clone());
        let listed: Result<_, (&'static str, String, u8)> =
            repository.list_all().await.map_err(|error| {
                ("registry", format!("{error} (has `docgenie migrate` run?)"), 5u8)
            });
        pool.close().await;
        listed
    });

    match result {
        Ok(descriptors) => {
            let mut lines = vec![format!("{} connectors registered", descriptors.len())];
            for descriptor in &descriptors {
                let kind = match descriptor.parsed_kind() {
                    Ok(kind) => kind.to_string(),
                    Err(_) => format!("{} (unsupported)", descriptor.kind),
                };
                let capture =
                    if descriptor.event_params.is_some() { ", change capture" } else { "" };
                lines.push(format!("- {}: {kind}{capture}", descriptor.name));
            }
            CommandResult::success("connectors", lines.join("\n"))
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("connectors", error_class, message, exit_code)
        }
    }
}
