use std::path::PathBuf;

use anyhow::Context;
use sans_core::{
    CoordLabel, Quantity, ReductionConfig, TracingDiagnostics, load_reduction_config,
    reduce_i_of_q,
};

use super::CliError;
use super::demo;

#[derive(clap::Args)]
pub(super) struct ReduceArgs {
    /// Reduction parameter file (JSON); when omitted, built-in
    /// demonstration parameters are used
    #[arg(long)]
    params: Option<PathBuf>,

    /// Detector pixels in the synthetic instrument
    #[arg(long, default_value_t = 16)]
    pixels: usize,

    /// Events recorded per detector pixel
    #[arg(long, default_value_t = 200)]
    events_per_pixel: usize,

    /// Write the reduced I(Q) as a JSON report to this path
    #[arg(long)]
    output: Option<PathBuf>,
}

pub(super) fn run_reduce_command(args: ReduceArgs) -> Result<i32, CliError> {
    if args.pixels == 0 || args.events_per_pixel == 0 {
        return Err(CliError::Usage(
            "Invalid instrument size; --pixels and --events-per-pixel must be positive."
                .to_string(),
        ));
    }

    let config = match &args.params {
        Some(path) => load_reduction_config(path)?,
        None => demo::demo_config(),
    };
    let parameters = config.into_parameters()?;
    println!(
        "Reducing a synthetic measurement ({} pixels, {} events per pixel)...",
        args.pixels, args.events_per_pixel
    );
    let inputs =
        demo::synthetic_inputs(args.pixels, args.events_per_pixel, &parameters.wavelength_bins)?;
    let outputs = reduce_i_of_q(&inputs, &parameters, &TracingDiagnostics)?;

    print_iofq(&outputs.iofq)?;
    if let Some(path) = &args.output {
        let report = IofqReport::from_quantity(&outputs.iofq)?;
        let json =
            serde_json::to_string_pretty(&report).context("failed to render the I(Q) report")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write the I(Q) report to '{}'", path.display()))?;
        println!("JSON report: {}", path.display());
    }
    Ok(0)
}

pub(super) fn run_config_template_command() -> Result<i32, CliError> {
    let template = ReductionConfig::template();
    let json =
        serde_json::to_string_pretty(&template).context("failed to render the parameter template")?;
    println!("{json}");
    Ok(0)
}

fn print_iofq(iofq: &Quantity) -> Result<(), CliError> {
    let dense = iofq.as_dense("result printing")?;
    let q_edges = iofq.coord_edges(CoordLabel::Q)?;
    let q_bins = q_edges.len().saturating_sub(1);
    if q_bins == 0 {
        return Ok(());
    }
    let values: Vec<f64> = dense.values().iter().copied().collect();
    let sigmas: Option<Vec<f64>> = dense
        .variances()
        .map(|variances| variances.iter().map(|v| v.sqrt()).collect());

    println!("{:>12} {:>14} {:>12}", "Q", "I(Q)", "sigma");
    let rows = values.len() / q_bins;
    for row in 0..rows {
        if rows > 1 {
            println!("{} {}:", dense.dims()[0], row);
        }
        for bin in 0..q_bins {
            let midpoint = 0.5 * (q_edges[bin] + q_edges[bin + 1]);
            let index = row * q_bins + bin;
            match &sigmas {
                Some(sigmas) => println!(
                    "{:>12.5} {:>14.6e} {:>12.4e}",
                    midpoint, values[index], sigmas[index]
                ),
                None => println!("{:>12.5} {:>14.6e} {:>12}", midpoint, values[index], "-"),
            }
        }
    }
    Ok(())
}

/// JSON form of a reduced I(Q): axis labels, shape and row-major values.
#[derive(serde::Serialize)]
struct IofqReport {
    dims: Vec<sans_core::Dim>,
    shape: Vec<usize>,
    #[serde(rename = "qEdges")]
    q_edges: Vec<f64>,
    values: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    variances: Option<Vec<f64>>,
}

impl IofqReport {
    fn from_quantity(iofq: &Quantity) -> Result<Self, CliError> {
        let dense = iofq.as_dense("report rendering")?;
        Ok(Self {
            dims: dense.dims().to_vec(),
            shape: dense.shape().to_vec(),
            q_edges: iofq.coord_edges(CoordLabel::Q)?,
            values: dense.values().iter().copied().collect(),
            variances: dense
                .variances()
                .map(|variances| variances.iter().copied().collect()),
        })
    }
}
