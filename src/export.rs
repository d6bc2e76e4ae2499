use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::{Workbook, Worksheet};

use crate::betting::{BandSearchResult, SeasonPnl};

/// Render settled bets and the season summary to one workbook: a "Bets"
/// sheet, a "Summary" sheet, and (when a sweep was run) a "Band Sweep"
/// sheet with the top results.
pub fn export_season_xlsx(
    path: &Path,
    pnl: &SeasonPnl,
    sweep: Option<&[BandSearchResult]>,
) -> Result<()> {
    let mut workbook = Workbook::new();

    let bets = workbook.add_worksheet().set_name("Bets").context("name bets sheet")?;
    write_rows(bets, &bet_rows(pnl))?;

    let summary = workbook
        .add_worksheet()
        .set_name("Summary")
        .context("name summary sheet")?;
    write_rows(summary, &summary_rows(pnl))?;

    if let Some(results) = sweep {
        let sheet = workbook
            .add_worksheet()
            .set_name("Band Sweep")
            .context("name sweep sheet")?;
        write_rows(sheet, &sweep_rows(results))?;
    }

    workbook
        .save(path)
        .with_context(|| format!("save workbook {}", path.display()))?;
    Ok(())
}

/// Delimited-file fallback for anything that reads CSV instead.
pub fn export_bets_csv(path: &Path, pnl: &SeasonPnl) -> Result<()> {
    let mut out = String::new();
    for row in bet_rows(pnl) {
        out.push_str(&row.join(","));
        out.push('\n');
    }
    std::fs::write(path, out).with_context(|| format!("write csv {}", path.display()))?;
    Ok(())
}

fn bet_rows(pnl: &SeasonPnl) -> Vec<Vec<String>> {
    let mut rows = vec![vec![
        "Date".to_string(),
        "Game".to_string(),
        "Side".to_string(),
        "Team".to_string(),
        "R".to_string(),
        "Odds".to_string(),
        "Stake".to_string(),
        "Profit".to_string(),
        "Won".to_string(),
    ]];
    for bet in &pnl.bets {
        rows.push(vec![
            bet.date.to_string(),
            bet.game_id.to_string(),
            format!("{:?}", bet.side),
            bet.team.clone(),
            format!("{:.2}", bet.r_value),
            format!("{:.2}", bet.odds),
            format!("{:.2}", bet.stake),
            format!("{:.2}", bet.profit),
            if bet.won { "Y" } else { "N" }.to_string(),
        ]);
    }
    rows
}

fn summary_rows(pnl: &SeasonPnl) -> Vec<Vec<String>> {
    vec![
        vec!["Metric".to_string(), "Value".to_string()],
        vec!["Bets".to_string(), pnl.bets.len().to_string()],
        vec!["Wins".to_string(), pnl.wins.to_string()],
        vec![
            "Starting bankroll".to_string(),
            format!("{:.2}", pnl.starting_bankroll),
        ],
        vec![
            "Final bankroll".to_string(),
            format!("{:.2}", pnl.final_bankroll),
        ],
        vec!["Profit".to_string(), format!("{:.2}", pnl.profit())],
        vec!["ROI".to_string(), format!("{:.4}", pnl.roi())],
    ]
}

fn sweep_rows(results: &[BandSearchResult]) -> Vec<Vec<String>> {
    let mut rows = vec![vec![
        "Low".to_string(),
        "High".to_string(),
        "Bets".to_string(),
        "Profit".to_string(),
        "ROI".to_string(),
    ]];
    for r in results.iter().take(50) {
        rows.push(vec![
            format!("{:.2}", r.band.low),
            format!("{:.2}", r.band.high),
            r.bets.to_string(),
            format!("{:.2}", r.profit),
            format!("{:.4}", r.roi),
        ]);
    }
    rows
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Vec<String>]) -> Result<()> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            worksheet
                .write_string(row_idx as u32, col_idx as u16, value)
                .with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
        }
    }
    Ok(())
}
