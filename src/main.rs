use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use featurestore::config::EngineConfig;
use featurestore::datastore::sqlite::{SqliteConnection, SqliteDatastore};
use featurestore::feature_catalog::FeatureCatalogConfig;
use featurestore::filter::{Filter, PropertyName, SortProperty};
use featurestore::request_handler::lock_handler::LockRequest;
use featurestore::request_handler::property_paths::PropertyPath;
use featurestore::request_handler::query_handler::{Query, ResultType};
use featurestore::FeatureStore;
use serde_json::json;

/// Featurestore - query and lock features stored in a relational database
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Feature catalog YAML file
    #[arg(long)]
    schema: PathBuf,

    /// SQLite database file
    #[arg(long)]
    database: PathBuf,

    /// Engine configuration YAML file (defaults to FEATURESTORE_* variables)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the matching features as JSON
    Query(QueryArgs),
    /// Print the number of matching features
    Count(QueryArgs),
    /// Print the initial SQL and fetch plans of a query without running it
    Explain(QueryArgs),
    /// Print the ids that must be locked to lock the matching features
    Lock {
        #[arg(long = "type")]
        type_name: String,
        /// Filter as JSON
        #[arg(long)]
        filter: Option<String>,
    },
    /// Print one feature by id
    Fetch {
        #[arg(long)]
        id: String,
        #[arg(long = "property")]
        properties: Vec<String>,
    },
    /// Print the subfeature and superfeature ids of a feature
    Navigate {
        #[arg(long)]
        id: String,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// Feature type to query; repeat for a join
    #[arg(long = "type", required = true)]
    type_names: Vec<String>,

    /// Alias per feature type
    #[arg(long = "alias")]
    aliases: Vec<String>,

    /// Filter as JSON
    #[arg(long)]
    filter: Option<String>,

    /// Property path to fetch; repeat for several
    #[arg(long = "property")]
    properties: Vec<String>,

    /// Sort property, `name` or `name:desc`
    #[arg(long = "sort")]
    sort: Vec<String>,

    /// Coordinate system of returned geometries
    #[arg(long)]
    srs: Option<String>,

    #[arg(long, default_value_t = 1)]
    start: usize,

    #[arg(long)]
    max: Option<usize>,
}

impl QueryArgs {
    fn into_query(self, result_type: ResultType) -> anyhow::Result<Query> {
        Ok(Query {
            type_names: self.type_names,
            aliases: (!self.aliases.is_empty()).then_some(self.aliases),
            filter: parse_filter(self.filter.as_deref())?,
            sort: self.sort.iter().map(|s| parse_sort(s)).collect(),
            srs_name: self.srs,
            start_position: self.start,
            max_features: self.max,
            result_type,
            property_names: self.properties.iter().map(|p| PropertyPath::parse(p)).collect(),
        })
    }
}

fn parse_filter(filter: Option<&str>) -> anyhow::Result<Option<Filter>> {
    filter
        .map(|text| serde_json::from_str(text).context("Filter is not valid filter JSON"))
        .transpose()
}

fn parse_sort(sort: &str) -> SortProperty {
    let (name, descending) = match sort.rsplit_once(':') {
        Some((name, "desc")) => (name, true),
        Some((name, "asc")) => (name, false),
        _ => (sort, false),
    };
    let property = match name.split_once('/') {
        Some((qualifier, name)) => PropertyName::qualified(qualifier, name),
        None => PropertyName::new(name),
    };
    SortProperty { property, descending }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_yaml_file(path),
        None => EngineConfig::from_env(),
    }
    .context("Invalid engine configuration")?;
    let catalog = FeatureCatalogConfig::from_yaml_file(&cli.schema)
        .and_then(|c| c.build())
        .with_context(|| format!("Cannot load feature catalog {}", cli.schema.display()))?;
    log::info!("Loaded {} feature types", catalog.feature_types().count());

    let datastore = match &config.transform_function {
        Some(template) => SqliteDatastore::new().with_transform_function(template.clone()),
        None => SqliteDatastore::new(),
    };
    let store = FeatureStore::new(catalog, datastore, config);
    let mut conn = SqliteConnection::open(&cli.database)
        .with_context(|| format!("Cannot open database {}", cli.database.display()))?;

    let output = match cli.command {
        Command::Query(args) => store.query(&mut conn, &args.into_query(ResultType::Results)?)?.to_json(),
        Command::Count(args) => store.query(&mut conn, &args.into_query(ResultType::Hits)?)?.to_json(),
        Command::Explain(args) => serde_json::to_value(store.explain(&args.into_query(ResultType::Results)?)?)?,
        Command::Lock { type_name, filter } => {
            let request = LockRequest::new(type_name, parse_filter(filter.as_deref())?);
            let locked = store.lock(&mut conn, &[request])?;
            json!(locked.iter().map(ToString::to_string).collect::<Vec<_>>())
        }
        Command::Fetch { id, properties } => {
            let fid = store.parse_feature_id(&id)?;
            let paths: Vec<PropertyPath> = properties.iter().map(|p| PropertyPath::parse(p)).collect();
            store.fetch_feature(&mut conn, &fid, &paths)?.to_json()
        }
        Command::Navigate { id } => {
            let fid = store.parse_feature_id(&id)?;
            let subs = store.subfeatures_of(&mut conn, &fid)?;
            let supers = store.superfeatures_of(&mut conn, &fid)?;
            json!({
                "subfeatures": subs
                    .iter()
                    .map(|(name, fids)| (name.clone(), json!(fids.iter().map(ToString::to_string).collect::<Vec<_>>())))
                    .collect::<serde_json::Map<_, _>>(),
                "superfeatures": supers.iter().map(ToString::to_string).collect::<Vec<_>>(),
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
