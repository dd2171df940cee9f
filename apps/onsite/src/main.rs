use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use identity::{HttpAuthConnector, IdentityGateway, SignInMechanism};
use storage::{BlobStorage, DocumentStorage};
use tokio::sync::broadcast;
use tracing::warn;
use wizard::{NoticeKind, WizardController, WizardEvent};

mod config;

/// 1x1 transparent PNG used when no image file is supplied.
const SAMPLE_IMAGE: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0xF8,
    0xCF, 0xC0, 0xF0, 0x1F, 0x00, 0x05, 0x05, 0x02, 0x00, 0x57, 0xBF, 0xAB, 0xD4, 0x00, 0x00,
    0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

#[derive(Parser, Debug)]
struct Args {
    /// Image file to upload in step 1; a built-in sample is used otherwise.
    #[arg(long)]
    image: Option<PathBuf>,
    /// Override the configured identity provider URL.
    #[arg(long)]
    identity_url: Option<String>,
    /// Use the redirect sign-in variant instead of the popup flow.
    #[arg(long)]
    redirect: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = config::load_settings();
    if let Some(identity_url) = args.identity_url {
        settings.identity_url = identity_url;
    }
    let mechanism = if args.redirect {
        SignInMechanism::Redirect
    } else {
        settings.sign_in_mechanism()
    };

    let database_url = config::prepare_database_url(&settings.database_url)?;
    let documents = DocumentStorage::new(&database_url).await?;
    documents.health_check().await?;
    let blobs = BlobStorage::new(&settings.blob_root)?;

    let connector = HttpAuthConnector::new(settings.identity_url, settings.identity_api_key);
    let gateway = IdentityGateway::new(Arc::new(connector), mechanism);

    // One-shot redirect-result check before deciding whether to show a
    // sign-in affordance; a failure here still settles the startup state.
    if let Err(err) = gateway.resolve_pending_redirect().await {
        warn!("pending redirect check failed: {err}");
    }

    if !gateway.current_state().await.is_signed_in() {
        match gateway.sign_in().await {
            Ok(()) => {}
            Err(err) if err.is_canceled() => {
                println!("[info] Sign-in canceled; nothing to do.");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }
    }
    let session = gateway
        .current_session()
        .await
        .context("session missing after sign-in")?;
    println!("Signed in as {} <{}>", session.display_name, session.email);

    let wizard =
        WizardController::new_with_capabilities(gateway, Arc::new(documents), Arc::new(blobs));
    let mut events = wizard.subscribe_events();

    // Step 1: create resources.
    wizard.create_job().await?;
    wizard.create_item().await?;
    let (filename, bytes) = match &args.image {
        Some(path) => {
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .context("image path has no file name")?;
            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to read image '{}'", path.display()))?;
            (filename, bytes)
        }
        None => ("sample.png".to_string(), SAMPLE_IMAGE.to_vec()),
    };
    wizard.upload_image(&filename, &bytes).await?;
    wizard.advance_step().await?;
    drain_events(&mut events);

    // Step 2: load everything back.
    wizard.load_job().await?;
    wizard.load_item().await?;
    if let Some(url) = wizard.load_image().await? {
        println!("Image available at {url}");
    }
    wizard.advance_step().await?;
    drain_events(&mut events);

    // Step 3: finish and start over.
    wizard.finish().await?;
    drain_events(&mut events);
    println!("All steps completed.");

    Ok(())
}

fn drain_events(events: &mut broadcast::Receiver<WizardEvent>) {
    while let Ok(event) = events.try_recv() {
        render_event(&event);
    }
}

fn render_event(event: &WizardEvent) {
    match event {
        WizardEvent::Notice {
            kind,
            title,
            detail,
        } => {
            let tag = match kind {
                NoticeKind::Success => "ok",
                NoticeKind::Error => "error",
                NoticeKind::Neutral => "info",
            };
            match detail {
                Some(detail) => println!("[{tag}] {title}: {detail}"),
                None => println!("[{tag}] {title}"),
            }
        }
        WizardEvent::StepChanged(step) => println!("-- step {} of 3", step.index()),
        WizardEvent::Reset => println!("-- wizard reset"),
    }
}
