//! Cost estimate command

use anyhow::Result;
use colored::Colorize;

use crate::client::{ApiClient, CostRequest};
use crate::output::{format_currency, print_json, print_warning, OutputFormat};

/// Estimate the monthly cost of a volume configuration
pub async fn estimate(client: &ApiClient, request: CostRequest, format: OutputFormat) -> Result<()> {
    let result = client.estimate_cost(&request).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            println!("{}", "Cost Estimate".bold());
            println!("{}", "=".repeat(50));
            println!(
                "Volume:                 {} GB {}",
                request.size_gb,
                result.priced_class.cyan()
            );
            println!("Priced in:              {}", result.priced_region);
            println!();

            println!("{}", "Monthly Costs".bold());
            println!("{}", "-".repeat(50));
            println!("Storage:                {}", format_currency(result.storage_cost));
            if result.iops_cost > 0.0 {
                println!("IOPS:                   {}", format_currency(result.iops_cost));
            }
            if result.throughput_cost > 0.0 {
                println!(
                    "Throughput:             {}",
                    format_currency(result.throughput_cost)
                );
            }
            println!(
                "{}                 {}",
                "Total:".bold(),
                format_currency(result.monthly_cost).green().bold()
            );

            for note in &result.notes {
                print_warning(note);
            }
        }
    }

    Ok(())
}
