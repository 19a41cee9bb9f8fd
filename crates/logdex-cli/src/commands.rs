//! Command implementations.
//!
//! Every command opens an [`IndexService`] over the resolved directories.
//! `index` and `rebuild` open it writable and run the worker. Query commands
//! open it read-only, so they work while another `logdex index --follow`
//! holds the writer.

use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use logdex::{Filter, IndexConfig, IndexService, IndexState, StateChange};
use tracing::info;

use crate::cli::{Cli, Commands, FilterArgs, SearchArgs};
use crate::error::CliError;
use crate::output::{
    EntryList, EntryRow, FileLevels, FileList, FileRow, GroupedResults, HitRow, IndexSummary,
    LevelCounts, OutputFormat, PageView,
};

const DEFAULT_PAGE: usize = 100;
const FOLLOW_TICK: Duration = Duration::from_secs(60);

/// Builds the service configuration from the config file and flags.
pub fn resolve_config(cli: &Cli) -> Result<IndexConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => IndexConfig::from_json_file(path)?,
        None => IndexConfig::default(),
    };
    if let Some(log_dir) = &cli.log_dir {
        config.log_dir.clone_from(log_dir);
    }
    if let Some(index_dir) = &cli.index_dir {
        config.index_dir.clone_from(index_dir);
    }
    if config.log_dir.as_os_str().is_empty() {
        return Err(CliError::Config("no log directory given".into()));
    }
    Ok(config)
}

/// Runs the parsed command line, writing results to `out`.
pub fn execute<W: Write>(cli: &Cli, out: &mut W) -> Result<(), CliError> {
    let format = OutputFormat::new(cli.format);
    let config = resolve_config(cli)?;
    let service = match cli.command {
        Commands::Index { .. } | Commands::Rebuild => IndexService::open(config)?,
        _ => IndexService::open_read_only(config)?,
    };
    let session = Session {
        service: &service,
        format: &format,
    };

    let result = match &cli.command {
        Commands::Index { follow } => session.index(out, *follow, false),
        Commands::Rebuild => session.index(out, false, true),
        Commands::Files => session.files(out),
        Commands::Search(args) => session.search(out, args),
        Commands::Levels { per_file, filter } => session.levels(out, *per_file, filter),
        Commands::Show {
            file,
            entry_id,
            nearby,
        } => session.show(out, file, *entry_id, *nearby),
    };
    service.shutdown()?;
    result
}

struct Session<'a> {
    service: &'a IndexService,
    format: &'a OutputFormat,
}

impl Session<'_> {
    fn index<W: Write>(&self, out: &mut W, follow: bool, rebuild: bool) -> Result<(), CliError> {
        if rebuild {
            self.service.request_rebuild()?;
        }
        self.service.start()?;
        let state = wait_until_settled(self.service);
        self.format.write(out, &self.summary(state))?;
        if state == IndexState::Error {
            return Err(CliError::IndexingFailed);
        }

        if follow {
            info!(dir = %self.service.log_dir().display(), "following log directory");
            self.service.attach_observer(|state| info!(%state, "index state"));
            loop {
                if let StateChange::Changed(IndexState::Error) =
                    self.service.wait_for_state_change(FOLLOW_TICK)
                {
                    return Err(CliError::IndexingFailed);
                }
            }
        }
        Ok(())
    }

    fn summary(&self, state: IndexState) -> IndexSummary {
        IndexSummary {
            state,
            files: self.service.list_files().len(),
            entries: self.service.num_docs(),
        }
    }

    fn files<W: Write>(&self, out: &mut W) -> Result<(), CliError> {
        let rows = self
            .service
            .list_files()
            .into_iter()
            .map(|(id, name)| {
                let range = self.service.date_range(id);
                FileRow {
                    id: id.0,
                    name,
                    bytes_indexed: self.service.bytes_indexed(id),
                    first: range.map(|r| r.begin),
                    last: range.map(|r| r.end),
                    levels: self.service.levels_of_file(id),
                }
            })
            .collect();
        self.format.write(out, &FileList(rows))
    }

    fn filter(&self, args: &FilterArgs) -> Result<Filter, CliError> {
        let mut filter = Filter::between(
            args.since.unwrap_or(i64::MIN),
            args.until.unwrap_or(i64::MAX),
        )
        .with_levels(args.level.iter().copied());
        if let Some(module) = &args.module {
            filter = filter.with_module(module);
        }
        if let Some(class) = &args.class {
            filter = filter.with_class(class);
        }
        if let Some(exception) = &args.exception {
            filter = filter.with_exception(exception);
        }
        if let Some(file) = &args.file {
            let id = self
                .service
                .file_id(file)
                .ok_or_else(|| CliError::FileNotFound(file.clone()))?;
            filter = filter.with_file(id);
        }
        if let Some(words) = &args.contains {
            filter = filter.with_phrase(words);
        }
        Ok(filter)
    }

    fn search<W: Write>(&self, out: &mut W, args: &SearchArgs) -> Result<(), CliError> {
        let filter = self.filter(&args.filter)?;
        if args.sorted {
            let names: BTreeMap<_, _> = self.service.list_files().into_iter().collect();
            let rows = self
                .service
                .sorted_search(&filter, args.limit)?
                .into_iter()
                .map(|(id, entry)| EntryRow {
                    file: names.get(&id).cloned().unwrap_or_default(),
                    entry,
                })
                .collect();
            return self.format.write(out, &EntryList(rows));
        }
        if args.limit.is_none() && args.cursor.is_none() {
            return self
                .format
                .write(out, &GroupedResults(self.service.search(&filter)?));
        }

        let page = self.service.search_page(
            &filter,
            args.cursor.as_deref(),
            args.limit.unwrap_or(DEFAULT_PAGE),
        )?;
        let names: BTreeMap<_, _> = self.service.list_files().into_iter().collect();
        let view = PageView {
            hits: page
                .hits
                .iter()
                .map(|hit| HitRow {
                    file: names.get(&hit.file_id).cloned().unwrap_or_default(),
                    entry_id: hit.entry_id,
                    level: hit.level,
                    timestamp: hit.timestamp,
                })
                .collect(),
            next: page.next.map(|cursor| cursor.to_string()),
        };
        self.format.write(out, &view)
    }

    fn levels<W: Write>(&self, out: &mut W, per_file: bool, args: &FilterArgs) -> Result<(), CliError> {
        let filter = self.filter(args)?;
        if per_file {
            let levels = self
                .service
                .levels_per_file(&filter)?
                .into_iter()
                .map(|(id, levels)| (self.service.file_name(id).unwrap_or_default(), levels))
                .collect();
            return self.format.write(out, &FileLevels(levels));
        }
        self.format
            .write(out, &LevelCounts(self.service.level_histogram(&filter)?))
    }

    fn show<W: Write>(
        &self,
        out: &mut W,
        file: &str,
        entry_id: u64,
        nearby: Option<u64>,
    ) -> Result<(), CliError> {
        let id = self
            .service
            .file_id(file)
            .ok_or_else(|| CliError::FileNotFound(file.to_string()))?;
        let entries = match nearby {
            Some(range) => self.service.nearby_entries(id, entry_id, range)?,
            None => vec![self.service.entry(id, entry_id)?],
        };
        let rows = entries
            .into_iter()
            .map(|entry| EntryRow {
                file: file.to_string(),
                entry,
            })
            .collect();
        self.format.write(out, &EntryList(rows))
    }
}

/// Blocks until the worker is ready or has failed.
fn wait_until_settled(service: &IndexService) -> IndexState {
    loop {
        let state = service.state();
        if matches!(state, IndexState::Ready | IndexState::Error) {
            return state;
        }
        service.wait_for_state_change_from(state, FOLLOW_TICK);
    }
}
