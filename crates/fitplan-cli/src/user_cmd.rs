//! `fitplan user` subcommands: minimal profile setup.

use anyhow::{Result, bail};
use sqlx::PgPool;
use uuid::Uuid;

use fitplan_db::models::Family;
use fitplan_db::queries::users;

use crate::UserCommands;

pub async fn run_user_command(command: UserCommands, pool: &PgPool) -> Result<()> {
    match command {
        UserCommands::Add { email } => {
            let user = users::insert_user(pool, &email).await?;
            println!("User created.");
            println!("  ID:    {}", user.id);
            println!("  Email: {}", user.email);
        }
        UserCommands::Show { id } => cmd_show(pool, id).await?,
    }
    Ok(())
}

async fn cmd_show(pool: &PgPool, id: Uuid) -> Result<()> {
    let Some(user) = users::get_user(pool, id).await? else {
        bail!("user {id} not found");
    };

    println!("User: {}", user.email);
    println!("  ID:               {}", user.id);
    for family in Family::ALL {
        let active = user
            .active_plan_id(family)
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".into());
        println!("  Active {:<8}  {}", format!("{family}:"), active);
    }
    if let Some(t) = user.last_active_plan_update {
        println!("  Last change:      {}", t.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}
