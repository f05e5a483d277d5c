use clap::Parser;
use expo_ai_rust::{acquire, cli, config, error, interactive, models, session};

use acquire::{LocalImageStore, StreetViewClient};
use cli::{Cli, Commands, InspectionMethod, ProjectArgs};
use config::Config;
use error::{ExpoAiError, Result};
use expo_ai_rust::geo::{
    derive_sample, normalize_place_name, read_point_table, BoundarySource, GeographySpec,
    NominatimClient, OverpassClient, ProjectContext, ReverseGeocoder,
};
use expo_ai_rust::orientation::RoadsClient;
use models::{CommandClassifier, CommandDetector};
use session::{Session, SessionDeps};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Sample { project } => {
            println!("🗺  expo-ai - 建物サンプル生成\n");

            let (ctx, sample_size) = build_context(&project, &config)?;
            let nominatim =
                NominatimClient::new(config.geocode_endpoint.clone(), config.timeout_seconds)?;
            let overpass =
                OverpassClient::new(config.overpass_endpoint.clone(), config.timeout_seconds)?;

            println!("[1/1] サンプリングパイプラインを実行中...");
            let sample = derive_sample(&ctx, &nominatim, &overpass, sample_size)?;
            println!("✔ {}棟のサンプルを生成\n", sample.buildings.len());

            println!("✅ 完了");
        }

        Commands::Inspect { project, ai } => {
            println!("🏢 expo-ai - 点検セッション\n");

            let (mut ctx, sample_size) = build_context(&project, &config)?;
            ctx.ai_assist = ai;

            println!("[1/3] 建物サンプルを準備中...");
            let nominatim =
                NominatimClient::new(config.geocode_endpoint.clone(), config.timeout_seconds)?;
            let overpass =
                OverpassClient::new(config.overpass_endpoint.clone(), config.timeout_seconds)?;
            let sample = derive_sample(&ctx, &nominatim, &overpass, sample_size)?;
            println!("✔ {}棟のサンプルを検出\n", sample.buildings.len());

            println!("[2/3] 外部サービスを初期化中...{}", if ai { " (AIアシスト有効)" } else { "" });
            let deps = build_deps(&config, project.method)?;
            println!("✔ 初期化完了\n");

            println!("[3/3] セッション開始");
            let mut session = Session::new(ctx, deps);
            session.load_sample(sample);
            interactive::run_interactive(&mut session)?;

            println!("\n✅ 点検セッションを終了しました");
        }

        Commands::Config { set_api_key, show } => {
            let mut config = config;

            if let Some(key) = set_api_key {
                config.set_api_key(key)?;
                println!("✔ APIキーを設定しました");
            }

            if show {
                println!("設定:");
                println!("  検出コマンド: {}", config.detector_command);
                println!("  分類コマンド: {}", config.classifier_command);
                println!("  画像サイズ: {}x{}", config.image_width, config.image_height);
                println!(
                    "  視野角/ピッチ/スケール: {} / {} / {}",
                    config.fov, config.pitch, config.scale
                );
                println!(
                    "  APIキー: {}",
                    if config.api_key.is_some() || std::env::var("GOOGLE_MAPS_API_KEY").is_ok() {
                        "設定済み"
                    } else {
                        "未設定"
                    }
                );
            }
        }

        Commands::Cache { image_dir } => {
            let store = LocalImageStore::new(image_dir.clone());
            let (cropped, displayed) = store.cache_counts();
            println!("派生画像キャッシュ:");
            println!("  フォルダ: {}", image_dir.display());
            println!("  切り抜き: {}件", cropped);
            println!("  注釈済み: {}件", displayed);
        }
    }

    Ok(())
}

/// CLI引数からプロジェクト文脈を組み立てる
fn build_context(args: &ProjectArgs, config: &Config) -> Result<(ProjectContext, Option<usize>)> {
    let geocoder = NominatimClient::new(config.geocode_endpoint.clone(), config.timeout_seconds)?;

    let (spec, city, country, custom_name, images_per_building, sample_size) = match args.method {
        InspectionMethod::Polygon => {
            let (source, seed_coord) = polygon_source(args)?;
            let (city, country) = match (&args.city, &args.country) {
                (Some(city), Some(country)) => (city.clone(), country.clone()),
                _ => geocode_or_unknown(&geocoder, seed_coord),
            };
            (
                GeographySpec::Polygon(source),
                city,
                country,
                String::new(),
                3,
                args.sample_size,
            )
        }
        InspectionMethod::Specific => {
            let csv = args.points_csv.clone().ok_or_else(|| {
                ExpoAiError::InvalidInput("specific方式には --points-csv が必要です".into())
            })?;
            let name = require_name(args)?;
            let first = read_point_table(&csv)?
                .first()
                .map(|row| (row.1, row.2));
            let (city, country) = geocode_or_unknown(&geocoder, first);
            (
                GeographySpec::SpecificList { csv },
                city,
                country,
                name,
                3,
                None,
            )
        }
        InspectionMethod::Local => {
            let image_dir = args.image_dir.clone().ok_or_else(|| {
                ExpoAiError::InvalidInput("local方式には --image-dir が必要です".into())
            })?;
            let metadata_csv = args.metadata_csv.clone().ok_or_else(|| {
                ExpoAiError::InvalidInput("local方式には --metadata-csv が必要です".into())
            })?;
            if args.images_per_building > 3 {
                return Err(ExpoAiError::InvalidInput(
                    "建物あたりの画像枚数は3以下を指定してください".into(),
                ));
            }
            let name = require_name(args)?;
            let first = read_point_table(&metadata_csv)?
                .first()
                .map(|row| (row.1, row.2));
            let (city, country) = geocode_or_unknown(&geocoder, first);
            (
                GeographySpec::LocalFolder {
                    image_dir,
                    metadata_csv,
                },
                city,
                country,
                name,
                args.images_per_building,
                None,
            )
        }
    };

    let ctx = ProjectContext {
        project_dir: args.project.clone(),
        country: normalize_place_name(&country),
        city: normalize_place_name(&city),
        custom_name,
        spec,
        images_per_building,
        ai_assist: false,
    };
    ctx.ensure_ready()?;
    Ok((ctx, sample_size))
}

/// ポリゴン方式の境界ソースと逆ジオコーディング用の座標を決める
fn polygon_source(args: &ProjectArgs) -> Result<(BoundarySource, Option<(f64, f64)>)> {
    if let Some(corners) = &args.corners {
        let c1 = parse_latlon(&corners[0])?;
        let c2 = parse_latlon(&corners[1])?;
        return Ok((BoundarySource::Corners(c1, c2), Some(c1)));
    }
    if let Some(csv) = &args.boundary_csv {
        let vertices: Vec<(f64, f64)> = read_point_table(csv)?
            .into_iter()
            .map(|row| (row.1, row.2))
            .collect();
        let first = vertices.first().copied();
        return Ok((BoundarySource::Vertices(vertices), first));
    }
    match (&args.city, &args.country) {
        (Some(city), Some(country)) => {
            let name = format!(
                "{} , {}",
                normalize_place_name(city),
                normalize_place_name(country)
            );
            Ok((BoundarySource::AdminName(name), None))
        }
        _ => Err(ExpoAiError::InvalidInput(
            "polygon方式には --city/--country、--corners、--boundary-csv のいずれかが必要です"
                .into(),
        )),
    }
}

fn require_name(args: &ProjectArgs) -> Result<String> {
    args.name.clone().ok_or_else(|| {
        ExpoAiError::InvalidInput("この方式には --name（出力ファイル名）が必要です".into())
    })
}

fn geocode_or_unknown(
    geocoder: &NominatimClient,
    coord: Option<(f64, f64)>,
) -> (String, String) {
    match coord {
        Some((lat, lon)) => match geocoder.city_country(lat, lon) {
            Ok(pair) => pair,
            Err(e) => {
                eprintln!("逆ジオコーディングに失敗しました: {}", e);
                ("Unknown".into(), "Unknown".into())
            }
        },
        None => ("Unknown".into(), "Unknown".into()),
    }
}

/// "lat,lon" または "(lat, lon)" 形式を解析する
fn parse_latlon(text: &str) -> Result<(f64, f64)> {
    let cleaned = text.trim().trim_matches(|c| c == '(' || c == ')' || c == ' ');
    let mut parts = cleaned.split(',');
    let lat = parts.next().and_then(|v| v.trim().parse::<f64>().ok());
    let lon = parts.next().and_then(|v| v.trim().parse::<f64>().ok());
    match (lat, lon) {
        (Some(lat), Some(lon)) => Ok((lat, lon)),
        _ => Err(ExpoAiError::InvalidInput(format!(
            "座標の形式が不正です（\"lat,lon\" で指定）: {}",
            text
        ))),
    }
}

/// 実サービスでセッション依存を組み立てる
///
/// local方式はパノラマ・道路サービスを呼ばないので、APIキー未設定でも
/// 起動できるようにする（リモート方式では必須）。
fn build_deps(config: &Config, method: InspectionMethod) -> Result<SessionDeps> {
    let api_key = match method {
        InspectionMethod::Local => config.get_api_key().unwrap_or_default(),
        _ => config.get_api_key()?,
    };
    let mut remote_config = config.clone();
    remote_config.api_key = Some(api_key.clone());

    Ok(SessionDeps {
        panorama: Box::new(StreetViewClient::from_config(&remote_config)?),
        roads: Box::new(RoadsClient::new(
            config.roads_endpoint.clone(),
            api_key,
            config.timeout_seconds,
        )?),
        geocoder: Box::new(NominatimClient::new(
            config.geocode_endpoint.clone(),
            config.timeout_seconds,
        )?),
        detector: Box::new(CommandDetector::new(
            config.detector_command.clone(),
            config.detector_weights.clone(),
        )),
        classifier: Box::new(CommandClassifier::new(
            config.classifier_command.clone(),
            config.classifier_weights_dir.clone().into(),
        )),
        pitch: config.pitch,
        fov: config.fov,
    })
}
