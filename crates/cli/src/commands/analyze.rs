//! Volume analysis command

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{AnalysisReport, ApiClient, VolumeRecommendation};
use crate::output::{
    color_status, format_currency, format_gb, format_optional_currency, print_info, print_json,
    print_table, print_warning, truncate, OutputFormat,
};

/// Row for the recommendations table
#[derive(Tabled)]
struct RecommendationRow {
    #[tabled(rename = "Volume")]
    volume_id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    volume_type: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Classification")]
    classification: String,
    #[tabled(rename = "Cost/mo")]
    cost: String,
    #[tabled(rename = "Savings/mo")]
    savings: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl From<&VolumeRecommendation> for RecommendationRow {
    fn from(rec: &VolumeRecommendation) -> Self {
        let reason = match &rec.error {
            Some(error) => format!("error: {}", error),
            None => rec.reason.clone(),
        };
        Self {
            volume_id: rec.volume_id.clone(),
            name: rec.name.clone().unwrap_or_else(|| "-".to_string()),
            volume_type: rec.volume_type.clone(),
            size: format_gb(rec.size_gb),
            classification: color_status(&rec.classification),
            cost: format_optional_currency(rec.current_monthly_cost),
            savings: format_currency(rec.estimated_monthly_savings),
            action: rec
                .suggested_action
                .as_ref()
                .map(|a| a.label().to_string())
                .unwrap_or_else(|| "-".to_string()),
            reason: truncate(&reason, 60),
        }
    }
}

/// Analyze volumes and print recommendations
pub async fn run(client: &ApiClient, volume_ids: Vec<String>, format: OutputFormat) -> Result<()> {
    if volume_ids.is_empty() && format == OutputFormat::Table {
        print_info("Analyzing every volume in the region, this may take a while");
    }

    let report = client.analyze(volume_ids).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(&report),
    }

    Ok(())
}

fn print_report(report: &AnalysisReport) {
    println!("{}", "Volume Analysis".bold());
    println!("{}", "=".repeat(50));
    println!("Region:                 {}", report.region.cyan());
    println!("Volumes analyzed:       {}", report.summary.total_volumes);
    println!("Idle:                   {}", report.summary.idle_count);
    println!(
        "Overprovisioned:        {}",
        report.summary.overprovisioned_count
    );
    println!(
        "{} {}",
        "Potential Savings:".bold(),
        format!("{}/mo", format_currency(report.summary.estimated_monthly_savings))
            .green()
            .bold()
    );
    println!();

    let rows: Vec<RecommendationRow> = report.results.iter().map(RecommendationRow::from).collect();
    print_table(rows, "No volumes found");

    if report.summary.error_count > 0 {
        println!();
        print_warning(&format!(
            "{} volume(s) could not be analyzed",
            report.summary.error_count
        ));
    }
}
