use anyhow::{bail, Context as _, Result};
use chrono::NaiveDate;
use common::config::Config;
use common::types::{DateWindow, Granularity, ServiceKind};
use common::warehouse::{Query, WarehouseClient};
use std::io::Write;
use transfers::aggregate::{
    asset_query, recent_events_query, route_query, service_query, time_series_query,
    totals_query,
};
use transfers::present;
use transfers::{
    AssetRow, QueryFragment, RouteRow, SeriesPoint, ServiceRow, Totals, TransferEvent,
};

use crate::loader;

const USAGE: &str = "usage: reporter <totals|series|routes|services|assets|events|sql|load> ...

  reporter totals   [START END]
  reporter series   <day|week|month> [START END]
  reporter routes   [START END]
  reporter services [START END]
  reporter assets   [START END]
  reporter events   [START END]
  reporter sql      <totals|series|routes|services|assets|events> [day|week|month] [START END]
  reporter load     <transfers|gmp> <FILE.jsonl>

Dates are YYYY-MM-DD (UTC). Without them the configured trailing window is used.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    Totals,
    Series(Granularity),
    Routes,
    Services,
    Assets,
    Events,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Show {
        report: Report,
        dates: Option<(NaiveDate, NaiveDate)>,
    },
    Sql {
        report: Report,
        dates: Option<(NaiveDate, NaiveDate)>,
    },
    Load {
        kind: ServiceKind,
        path: String,
    },
}

pub fn parse_args<I>(mut args: I) -> std::result::Result<Command, String>
where
    I: Iterator<Item = String>,
{
    // Drop argv[0].
    let _ = args.next();

    let Some(cmd) = args.next() else {
        return Err(USAGE.to_string());
    };
    let rest: Vec<String> = args.collect();

    match cmd.as_str() {
        "sql" => {
            let (name, rest) = rest
                .split_first()
                .ok_or_else(|| "usage: reporter sql <report> [START END]".to_string())?;
            let (report, rest) = parse_report(name, rest)?;
            Ok(Command::Sql {
                report,
                dates: parse_dates(rest)?,
            })
        }
        "load" => match rest.as_slice() {
            [kind, path] => {
                let kind = match kind.as_str() {
                    "transfers" => ServiceKind::TokenTransfer,
                    "gmp" => ServiceKind::MessagePassing,
                    other => return Err(format!("unknown source: {other} (transfers|gmp)")),
                };
                Ok(Command::Load {
                    kind,
                    path: path.clone(),
                })
            }
            _ => Err("usage: reporter load <transfers|gmp> <FILE.jsonl>".to_string()),
        },
        "help" | "-h" | "--help" => Err(USAGE.to_string()),
        name => {
            let (report, rest) = parse_report(name, &rest)?;
            Ok(Command::Show {
                report,
                dates: parse_dates(rest)?,
            })
        }
    }
}

fn parse_report<'a>(
    name: &str,
    rest: &'a [String],
) -> std::result::Result<(Report, &'a [String]), String> {
    let report = match name {
        "totals" => Report::Totals,
        "routes" => Report::Routes,
        "services" => Report::Services,
        "assets" => Report::Assets,
        "events" => Report::Events,
        "series" => {
            let (g, rest) = rest
                .split_first()
                .ok_or_else(|| "usage: reporter series <day|week|month> [START END]".to_string())?;
            let g = Granularity::from_str_loose(g)
                .ok_or_else(|| format!("unknown granularity: {g} (day|week|month)"))?;
            return Ok((Report::Series(g), rest));
        }
        other => return Err(format!("unknown command: {other}\n\n{USAGE}")),
    };
    Ok((report, rest))
}

fn parse_dates(rest: &[String]) -> std::result::Result<Option<(NaiveDate, NaiveDate)>, String> {
    let parse = |s: &str| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("bad date {s:?}: {e}"))
    };
    match rest {
        [] => Ok(None),
        [start, end] => Ok(Some((parse(start)?, parse(end)?))),
        _ => Err("expected both START and END dates, or neither".to_string()),
    }
}

/// Everything a command needs: config, a connected warehouse and the view
/// rendered for that warehouse's dialect.
pub struct Context {
    pub config: Config,
    pub client: WarehouseClient,
    pub view: QueryFragment,
    pub today: NaiveDate,
}

impl Context {
    fn window(&self, dates: Option<(NaiveDate, NaiveDate)>) -> Result<DateWindow> {
        match dates {
            Some((start, end)) => DateWindow::new(start, end),
            None => DateWindow::trailing(self.today, self.config.dashboard.default_window_days)
                .context("dashboard.default_window_days is too large"),
        }
    }

    fn query(&self, report: Report, window: &DateWindow) -> Query {
        let limits = &self.config.dashboard;
        match report {
            Report::Totals => totals_query(&self.view, window),
            Report::Series(g) => time_series_query(&self.view, window, g),
            Report::Routes => route_query(&self.view, window),
            Report::Services => service_query(&self.view, window),
            Report::Assets => asset_query(&self.view, window, limits.top_assets),
            Report::Events => recent_events_query(&self.view, window, limits.recent_events),
        }
    }
}

pub async fn run_command(ctx: &Context, cmd: Command) -> Result<()> {
    let mut out = std::io::stdout();
    match cmd {
        Command::Load { kind, path } => {
            let Some(sqlite) = ctx.client.as_sqlite() else {
                bail!("load writes to the local mirror; set [warehouse] backend = \"sqlite\"");
            };
            let summary = loader::load_jsonl(sqlite.db(), kind, std::path::Path::new(&path)).await?;
            writeln!(out, "{path}: {summary}")?;
        }
        Command::Sql { report, dates } => {
            let window = ctx.window(dates)?;
            write_sql(&mut out, &ctx.query(report, &window))?;
        }
        Command::Show { report, dates } => {
            let window = ctx.window(dates)?;
            show(ctx, &mut out, report, &window).await?;
        }
    }
    Ok(())
}

async fn show<W: Write>(ctx: &Context, out: &mut W, report: Report, window: &DateWindow) -> Result<()> {
    let (wh, view, dash) = (&ctx.client, &ctx.view, &ctx.config.dashboard);
    writeln!(out, "{} ({window})", dash.title)?;
    match report {
        Report::Totals => write_totals(out, &transfers::aggregate_totals(wh, view, window).await?)?,
        Report::Series(g) => write_series(
            out,
            g,
            &transfers::aggregate_time_series(wh, view, window, g).await?,
        )?,
        Report::Routes => write_routes(out, &transfers::aggregate_by_route(wh, view, window).await?)?,
        Report::Services => {
            write_services(out, &transfers::aggregate_by_service(wh, view, window).await?)?;
        }
        Report::Assets => write_assets(
            out,
            &transfers::aggregate_by_asset(wh, view, window, dash.top_assets).await?,
        )?,
        Report::Events => write_events(
            out,
            &transfers::recent_events(wh, view, window, dash.recent_events).await?,
        )?,
    }
    Ok(())
}

/// SQL followed by its bound parameters, one per line.
pub fn write_sql<W: Write>(out: &mut W, query: &Query) -> std::io::Result<()> {
    writeln!(out, "{};", query.sql)?;
    writeln!(out)?;
    for (i, p) in query.params.iter().enumerate() {
        writeln!(out, "-- ?{} = {:?}", i + 1, p.to_text())?;
    }
    Ok(())
}

pub fn write_totals<W: Write>(out: &mut W, t: &Totals) -> std::io::Result<()> {
    writeln!(out, "  Successful txns : {}", present::count(t.transfer_count))?;
    writeln!(out, "  Users           : {}", present::count(t.user_count))?;
    writeln!(out, "  Volume (USD)    : {}", present::usd(t.volume_usd))
}

pub fn write_series<W: Write>(
    out: &mut W,
    granularity: Granularity,
    points: &[SeriesPoint],
) -> std::io::Result<()> {
    if points.is_empty() {
        return writeln!(out, "  No data to display.");
    }
    writeln!(
        out,
        "  {:<10}  {:>8}  {:>8}  {:>16}",
        granularity.as_str(),
        "txns",
        "users",
        "volume"
    )?;
    for p in points {
        writeln!(
            out,
            "  {}  {:>8}  {:>8}  {:>16}",
            p.bucket_start,
            present::count(p.transfer_count),
            present::count(p.user_count),
            present::usd(p.volume_usd)
        )?;
    }
    Ok(())
}

pub fn write_routes<W: Write>(out: &mut W, rows: &[RouteRow]) -> std::io::Result<()> {
    if rows.is_empty() {
        return writeln!(out, "  No data to display.");
    }
    for r in rows {
        writeln!(
            out,
            "  {:>16}  {:>8}  {} -> {}",
            present::usd(r.volume_usd),
            present::count(r.transfer_count),
            present::chain(r.source_chain.as_deref()),
            present::chain(r.destination_chain.as_deref()),
        )?;
    }
    Ok(())
}

pub fn write_services<W: Write>(out: &mut W, rows: &[ServiceRow]) -> std::io::Result<()> {
    if rows.is_empty() {
        return writeln!(out, "  No data to display.");
    }
    for r in rows {
        writeln!(
            out,
            "  {:<16} txns={}  users={}  volume={}  fees={}",
            r.service.label(),
            present::count(r.transfer_count),
            present::count(r.user_count),
            present::usd(r.volume_usd),
            present::usd(r.fees_usd),
        )?;
    }
    Ok(())
}

pub fn write_assets<W: Write>(out: &mut W, rows: &[AssetRow]) -> std::io::Result<()> {
    if rows.is_empty() {
        return writeln!(out, "  No data to display.");
    }
    for r in rows {
        writeln!(
            out,
            "  {:>16}  {:>8}  {}",
            present::usd(r.volume_usd),
            present::count(r.transfer_count),
            r.asset.as_deref().unwrap_or(present::NOT_AVAILABLE),
        )?;
    }
    Ok(())
}

pub fn write_events<W: Write>(out: &mut W, rows: &[TransferEvent]) -> std::io::Result<()> {
    if rows.is_empty() {
        return writeln!(out, "  No data to display.");
    }
    for e in rows {
        writeln!(
            out,
            "  {}  {:<15}  {} -> {}  {:>14}  {}  {}",
            e.created_at,
            e.service_kind.label(),
            present::chain(e.source_chain.as_deref()),
            present::chain(e.destination_chain.as_deref()),
            present::usd(e.amount_usd),
            e.asset.as_deref().unwrap_or(present::NOT_AVAILABLE),
            e.event_id,
        )?;
    }
    Ok(())
}
