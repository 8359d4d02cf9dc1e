use super::Context;

pub fn show(ctx: &Context) -> anyhow::Result<()> {
    match ctx.manager()?.load()? {
        Some(loaded) => println!("{}", serde_json::to_string_pretty(&loaded.document)?),
        None => println!("No remote config stored for this deployment yet."),
    }
    Ok(())
}

pub fn history(ctx: &Context) -> anyhow::Result<()> {
    let Some(loaded) = ctx.manager()?.load()? else {
        println!("No remote config stored for this deployment yet.");
        return Ok(());
    };
    for (i, command) in loaded.document.command_history.iter().enumerate() {
        println!("{:>4}  {command}", i + 1);
    }
    Ok(())
}

pub fn lease_status(ctx: &Context) -> anyhow::Result<()> {
    let manager = ctx.manager()?;
    match manager.lease_status()? {
        Some(status) if status.live => {
            let holder = status.record.holder_identity.as_deref().unwrap_or("unknown");
            println!(
                "held by {holder} (acquired {}, expires {})",
                status.record.acquire_time,
                status.record.expires_at()
            );
        }
        Some(status) => match status.record.holder_identity {
            Some(holder) => println!("expired (last held by {holder})"),
            None => println!("free"),
        },
        None => println!("free (never acquired)"),
    }
    Ok(())
}
