use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use diesel::{dsl::count, prelude::*};
use diesel_async::RunQueryDsl;
use tracing::{info, instrument, warn};

use crate::{
    models::{
        brackets,
        matches::recalculate_ratings,
        users::{NewUser, UserRole},
    },
    AppState,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create an account with admin rights
    CreateAdmin {
        username: String,
        email: String,
        password: String,
    },
    /// Rebuild every team rating from the completed matches
    RecalculateRatings,
    /// Clear all results of a bracket stage
    ResetBracket { stage_id: i32 },
    /// List teams with more players than the roster limit allows
    AuditRosters,
}

//skip state because it has members that don't implement Debug
#[instrument(name = "cli_command", skip(state))]
pub async fn parse_command(command: &Command, state: AppState) -> anyhow::Result<()> {
    let mut conn = state.db.get().await?;

    match command {
        Command::CreateAdmin {
            username,
            email,
            password,
        } => {
            if password.len() < 8 {
                bail!("Password must be at least 8 characters long");
            }
            let admin = NewUser::new(username, email, password, UserRole::Admin)?
                .create(&mut conn)
                .await
                .context("Failed to create admin account")?;
            info!(user_id = admin.id, "Admin account created");
        }
        Command::RecalculateRatings => {
            let tournament = &state.config.tournament;
            let replayed = recalculate_ratings(
                &mut conn,
                tournament.default_rating,
                tournament.elo_k_factor,
            )
            .await?;
            info!(replayed, "Team ratings recalculated");
        }
        Command::ResetBracket { stage_id } => {
            let detail = brackets::reset(&mut conn, *stage_id).await?;
            info!(
                stage_id,
                name = %detail.stage.name,
                scheduled = detail
                    .matches
                    .iter()
                    .filter(|view| view.match_id.is_some())
                    .count(),
                "Bracket stage reset"
            );
        }
        Command::AuditRosters => {
            use crate::schema::{players, teams};

            let limit = state.config.tournament.roster_size;
            let oversized: Vec<(i32, String, i64)> = teams::table
                .inner_join(players::table)
                .group_by((teams::id, teams::name))
                .having(count(players::id).gt(limit))
                .select((teams::id, teams::name, count(players::id)))
                .order(teams::id.asc())
                .load(&mut conn)
                .await?;

            for (team_id, name, players) in &oversized {
                warn!(team_id, %name, players, limit, "Roster over the limit");
            }
            info!(teams = oversized.len(), "Roster audit finished");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcommands_parse() {
        let args = Args::try_parse_from([
            "mrvl-arena",
            "create-admin",
            "root",
            "root@mrvl.gg",
            "correct horse",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Some(Command::CreateAdmin { ref username, .. }) if username == "root"
        ));

        let args = Args::try_parse_from(["mrvl-arena", "reset-bracket", "12"]).unwrap();
        assert!(matches!(
            args.command,
            Some(Command::ResetBracket { stage_id: 12 })
        ));

        let args = Args::try_parse_from(["mrvl-arena"]).unwrap();
        assert!(args.command.is_none());

        assert!(Args::try_parse_from(["mrvl-arena", "reset-bracket", "twelve"]).is_err());
    }
}
