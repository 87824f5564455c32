use {
    anyhow::{Context, Result},
    clap::ValueEnum,
    rollcall_config::RollcallConfig,
    rollcall_contacts::{ContactFilter, export::render_csv, vcard::render_cards},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    /// vCard 3.0, the same cards the shared contact file holds.
    Vcf,
    /// Every contact, opted-out ones included.
    Csv,
}

pub async fn export(config: &RollcallConfig, format: ExportFormat) -> Result<()> {
    let store = rollcall_contacts::open_store(&config.database.url, &config.database.name)
        .await
        .context("failed to open contact store")?;

    let output = match format {
        ExportFormat::Vcf => {
            let filter = ContactFilter::exportable(config.export.include_opted_out);
            render_cards(&store.find(&filter).await?)
        },
        ExportFormat::Csv => render_csv(&store.find(&ContactFilter::all()).await?),
    };
    print!("{output}");
    Ok(())
}
