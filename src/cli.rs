use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::Timelike;
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use crate::{
    api::AuditEvent,
    dashboard::AuditDashboard,
    export::ExportOutcome,
    gate::Transport,
    query::{FilterId, FilterSet},
    range::{DateTimeRangeResolver, RangeError, ResolvedRange, parse_date, parse_time},
};

#[derive(Parser)]
#[command(author, version, about = "Search and export the audit-event log", long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and store the session token
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "DASHBOARD_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// End the session and wipe local storage
    Logout,
    /// List companies
    Companies,
    /// List the stores of a company
    Stores {
        #[arg(long)]
        company: String,
    },
    /// List audit functionalities
    Functionalities,
    /// List the event types of a functionality
    EventTypes {
        /// Functionality name, e.g. "Login"
        #[arg(long)]
        functionality: String,
    },
    /// Show the most recent events
    Recent,
    /// Search events
    Search {
        #[command(flatten)]
        filters: FilterArgs,
        #[command(flatten)]
        range: RangeArgs,
        /// Also write the rows to this workbook
        #[arg(long)]
        xlsx: Option<PathBuf>,
    },
    /// Export events to the download directory
    Export {
        #[command(flatten)]
        filters: FilterArgs,
        #[command(flatten)]
        range: RangeArgs,
    },
}

#[derive(Args, Debug, Default)]
pub struct FilterArgs {
    /// Company id
    #[arg(long)]
    pub company: Option<String>,
    /// Store id; needs --company
    #[arg(long, requires = "company")]
    pub store: Option<String>,
    #[arg(long)]
    pub user: Option<String>,
    /// Functionality id
    #[arg(long)]
    pub functionality: Option<String>,
    /// Event type id; needs --functionality
    #[arg(long, requires = "functionality")]
    pub event_type: Option<String>,
    #[arg(long)]
    pub message: Option<String>,
}

impl FilterArgs {
    /// Feed the flags through the dashboard the way the filter panel would,
    /// loading dropdown options before selecting from them.
    pub async fn apply<T: Transport>(&self, dashboard: &mut AuditDashboard<T>) -> Result<()> {
        if let Some(company) = &self.company {
            dashboard.select_company(Some(company.clone())).await?;
        }
        if let Some(store) = &self.store {
            dashboard.select_store(Some(store.clone()))?;
        }
        if let Some(user) = &self.user {
            dashboard.set_text_filter(FilterId::User, user.as_str())?;
        }
        if let Some(functionality) = &self.functionality {
            dashboard.load_functionalities().await?;
            dashboard
                .select_functionality(Some(functionality.clone()))
                .await?;
            if !has_option(dashboard.filters(), FilterId::Functionality, functionality) {
                warn!(%functionality, "unknown functionality id, it will not be sent");
            }
        }
        if let Some(event_type) = &self.event_type {
            dashboard.select_event_type(Some(event_type.clone()))?;
            if !has_option(dashboard.filters(), FilterId::EventType, event_type) {
                warn!(%event_type, "unknown event type id, it will not be sent");
            }
        }
        if let Some(message) = &self.message {
            dashboard.set_text_filter(FilterId::Message, message.as_str())?;
        }
        Ok(())
    }
}

fn has_option(filters: &FilterSet, id: FilterId, value: &str) -> bool {
    filters
        .get(id)
        .is_some_and(|filter| filter.options().iter().any(|option| option.value == value))
}

#[derive(Args, Debug, Default)]
pub struct RangeArgs {
    /// MM-DD-YYYY
    #[arg(long)]
    pub from_date: Option<String>,
    /// HH:MM:SS
    #[arg(long)]
    pub from_time: Option<String>,
    /// MM-DD-YYYY
    #[arg(long)]
    pub to_date: Option<String>,
    /// HH:MM:SS; 00:00:00 means end of day
    #[arg(long)]
    pub to_time: Option<String>,
    /// Allow dates back to 2000-01-01
    #[arg(long)]
    pub extended_history: bool,
}

impl RangeArgs {
    fn is_empty(&self) -> bool {
        self.from_date.is_none()
            && self.from_time.is_none()
            && self.to_date.is_none()
            && self.to_time.is_none()
    }

    /// Drive the picker: open, edit the given fields, confirm. Fields left
    /// out keep their seeded values.
    pub fn apply(&self, picker: &mut DateTimeRangeResolver) -> Result<Option<ResolvedRange>, RangeError> {
        if self.is_empty() {
            return Ok(None);
        }

        picker.open();
        let edited = self.edit(picker);
        if edited.is_err() {
            picker.cancel();
        }
        edited?;

        match picker.confirm() {
            Ok(range) => Ok(Some(range)),
            Err(err) => {
                picker.cancel();
                Err(err)
            }
        }
    }

    fn edit(&self, picker: &mut DateTimeRangeResolver) -> Result<(), RangeError> {
        if let Some(raw) = &self.from_date {
            picker.set_from_date(parse_date(raw)?)?;
        }
        if let Some(raw) = &self.from_time {
            let time = parse_time(raw)?;
            picker.set_from_time(time.hour(), time.minute(), time.second())?;
        }
        if let Some(raw) = &self.to_date {
            picker.set_to_date(parse_date(raw)?)?;
        }
        if let Some(raw) = &self.to_time {
            let time = parse_time(raw)?;
            picker.set_to_time(time.hour(), time.minute(), time.second())?;
        }
        Ok(())
    }
}

pub async fn run<T: Transport>(command: Commands, dashboard: &mut AuditDashboard<T>) -> Result<()> {
    if let Commands::Login { username, password } = &command {
        dashboard
            .api()
            .login(username, password)
            .await
            .context("login failed")?;
        println!("logged in as {username}");
        return Ok(());
    }

    if !dashboard.api().gate().session().is_authenticated() {
        bail!("not logged in, run `audit-console login` first");
    }

    match command {
        Commands::Login { .. } => {}
        Commands::Logout => {
            dashboard.logout().await.context("logout call failed")?;
            println!("logged out");
        }
        Commands::Companies => {
            dashboard.load_companies().await.context("failed to load companies")?;
            print_options(dashboard.filters(), FilterId::CompanyId);
        }
        Commands::Stores { company } => {
            dashboard
                .select_company(Some(company))
                .await
                .context("failed to load stores")?;
            print_options(dashboard.filters(), FilterId::StoreId);
        }
        Commands::Functionalities => {
            dashboard
                .load_functionalities()
                .await
                .context("failed to load functionalities")?;
            print_options(dashboard.filters(), FilterId::Functionality);
        }
        Commands::EventTypes { functionality } => {
            let event_types = dashboard
                .api()
                .event_types(&functionality)
                .await
                .context("failed to load event types")?;
            for event_type in event_types {
                println!("{}\t{}", event_type.id, event_type.name);
            }
        }
        Commands::Recent => {
            dashboard.load_recent().await.context("failed to load recent events")?;
            print_rows(dashboard.rows());
        }
        Commands::Search {
            filters,
            range,
            xlsx,
        } => {
            prepare(dashboard, &filters, &range).await?;
            let warning = dashboard.search().await.context("search failed")?;
            if let Some(warning) = warning {
                eprintln!("warning: {warning}");
            }
            print_rows(dashboard.rows());
            if let Some(path) = xlsx {
                dashboard
                    .save_rows(&path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
        }
        Commands::Export { filters, range } => {
            prepare(dashboard, &filters, &range).await?;
            match dashboard.export().await.context("export failed")? {
                ExportOutcome::Saved { path, bytes } => {
                    println!("saved {} ({bytes} bytes)", path.display());
                }
                ExportOutcome::DiscardedHtml { content_type } => {
                    println!("server returned {content_type} instead of a file, nothing saved");
                }
            }
        }
    }
    Ok(())
}

async fn prepare<T: Transport>(
    dashboard: &mut AuditDashboard<T>,
    filters: &FilterArgs,
    range: &RangeArgs,
) -> Result<()> {
    if range.extended_history {
        dashboard.set_extended_history(true)?;
    }
    range
        .apply(dashboard.range_mut())
        .context("invalid date range")?;
    filters.apply(dashboard).await.context("failed to apply filters")
}

fn print_options(filters: &FilterSet, id: FilterId) {
    let Some(filter) = filters.get(id) else {
        return;
    };
    for option in filter.options() {
        println!("{}\t{}", option.value, option.label);
    }
}

fn print_rows(rows: &[AuditEvent]) {
    for row in rows {
        println!("{}", format_row(row));
    }
    eprintln!("{} rows", rows.len());
}

fn format_row(event: &AuditEvent) -> String {
    let store = event
        .store_name
        .as_deref()
        .or(event.store_location_id.as_deref())
        .unwrap_or("-");
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        event.event_timestamp, event.functionality, event.event_type, event.user_name, store, event.message
    )
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn picker() -> DateTimeRangeResolver {
        DateTimeRangeResolver::with_clock(today)
    }

    #[test]
    fn search_flags_parse() {
        let cli = Cli::try_parse_from([
            "audit-console",
            "search",
            "--company",
            "C1",
            "--store",
            "S9",
            "--from-date",
            "06-01-2024",
            "--extended-history",
            "--xlsx",
            "out.xlsx",
        ])
        .unwrap();

        let Commands::Search {
            filters,
            range,
            xlsx,
        } = cli.command
        else {
            panic!("expected search");
        };
        assert_eq!(filters.company.as_deref(), Some("C1"));
        assert_eq!(filters.store.as_deref(), Some("S9"));
        assert_eq!(range.from_date.as_deref(), Some("06-01-2024"));
        assert!(range.extended_history);
        assert_eq!(xlsx, Some(PathBuf::from("out.xlsx")));
    }

    #[test]
    fn store_without_company_is_rejected() {
        assert!(Cli::try_parse_from(["audit-console", "export", "--store", "S9"]).is_err());
    }

    #[test]
    fn no_range_flags_leave_picker_untouched() {
        let mut picker = picker();
        assert_eq!(RangeArgs::default().apply(&mut picker), Ok(None));
        assert!(picker.committed().is_none());
    }

    #[test]
    fn partial_range_flags_fill_from_today() {
        let mut picker = picker();
        let args = RangeArgs {
            from_date: Some("06-10-2024".into()),
            to_time: Some("00:00:00".into()),
            ..RangeArgs::default()
        };

        let range = args.apply(&mut picker).unwrap().unwrap();

        assert_eq!(range.from_date_string(), "06-10-2024");
        assert_eq!(range.from_time(), NaiveTime::MIN);
        assert_eq!(range.to_date(), today());
        assert_eq!(range.to_time_string(), "23:59:59");
        assert!(!picker.is_open());
    }

    #[test]
    fn out_of_bounds_date_leaves_picker_closed() {
        let mut picker = picker();
        let args = RangeArgs {
            from_date: Some("01-01-2020".into()),
            ..RangeArgs::default()
        };

        let err = args.apply(&mut picker).unwrap_err();

        assert!(matches!(err, RangeError::OutOfBounds { .. }));
        assert!(!picker.is_open());
        assert!(picker.committed().is_none());
    }

    #[test]
    fn rows_render_tab_separated() {
        let event = AuditEvent {
            event_timestamp: "2024-06-01 10:00:00".into(),
            functionality: "Login".into(),
            event_type: "PasswordReset".into(),
            user_name: "jdoe".into(),
            message: "reset".into(),
            ..Default::default()
        };
        assert_eq!(
            format_row(&event),
            "2024-06-01 10:00:00\tLogin\tPasswordReset\tjdoe\t-\treset"
        );
    }
}
