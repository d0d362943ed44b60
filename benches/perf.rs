use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use rinkcast::calibration::IsotonicMap;
use rinkcast::dataset::DatasetBuilder;
use rinkcast::elo::{RatingConfig, RatingEngine};
use rinkcast::features::{FeatureConfig, FeatureEngineer};
use rinkcast::game_log::GameLogStore;
use rinkcast::synthetic::{LeagueSpec, SignalMode, generate_league};
use rinkcast::team_fixtures::parse_fixtures_json;
use rinkcast::teams::TeamDirectory;
use rinkcast::trainer::fit_logistic;

fn league() -> GameLogStore {
    let spec = LeagueSpec {
        teams: 16,
        seasons: 4,
        game_days: 40,
        mode: SignalMode::DeterministicStrength,
        missing_stat_rate: 0.02,
        ..LeagueSpec::default()
    };
    GameLogStore::ingest(generate_league(&spec)).0
}

fn bench_ingest(c: &mut Criterion) {
    let rows = generate_league(&LeagueSpec::default());
    c.bench_function("game_log_ingest", |b| {
        b.iter(|| {
            let (store, events) = GameLogStore::ingest(black_box(rows.clone()));
            black_box((store.len(), events.len()));
        })
    });
}

fn bench_rating_replay(c: &mut Criterion) {
    let store = league();
    c.bench_function("rating_replay", |b| {
        b.iter(|| {
            let (engine, pregame) = RatingEngine::replay(RatingConfig::default(), black_box(&store));
            black_box((engine.last_processed(), pregame.len()));
        })
    });
}

fn bench_feature_engineering(c: &mut Criterion) {
    let store = league();
    let (_, pregame) = RatingEngine::replay(RatingConfig::default(), &store);
    let engineer = FeatureEngineer::new(FeatureConfig::default(), 1500.0).unwrap();

    c.bench_function("feature_engineering", |b| {
        b.iter(|| {
            let features = engineer.engineer(black_box(&store), black_box(&pregame));
            black_box(features.len());
        })
    });
}

fn bench_dataset_build(c: &mut Criterion) {
    let store = league();
    let (_, pregame) = RatingEngine::replay(RatingConfig::default(), &store);
    let engineer = FeatureEngineer::new(FeatureConfig::default(), 1500.0).unwrap();
    let features = engineer.engineer(&store, &pregame);
    let directory = TeamDirectory::from_abbreviations(store.by_team().into_keys());
    let builder = DatasetBuilder::new(&engineer, &directory);
    let seasons = store.seasons();
    let range = seasons[0]..=seasons[seasons.len() - 1];

    c.bench_function("dataset_build", |b| {
        b.iter(|| {
            let dataset = builder
                .build(&store, &pregame, black_box(&features), range.clone())
                .unwrap();
            black_box(dataset.rows.len());
        })
    });
}

fn bench_logistic_fit(c: &mut Criterion) {
    let store = league();
    let (_, pregame) = RatingEngine::replay(RatingConfig::default(), &store);
    let engineer = FeatureEngineer::new(FeatureConfig::default(), 1500.0).unwrap();
    let features = engineer.engineer(&store, &pregame);
    let directory = TeamDirectory::from_abbreviations(store.by_team().into_keys());
    let seasons = store.seasons();
    let dataset = DatasetBuilder::new(&engineer, &directory)
        .build(&store, &pregame, &features, seasons[0]..=seasons[1])
        .unwrap();
    let matrix = dataset.matrix();
    let x: Vec<&[f64]> = matrix.x.iter().map(Vec::as_slice).collect();

    let mut group = c.benchmark_group("logistic_fit");
    group.sample_size(10);
    group.bench_function("c_1", |b| {
        b.iter(|| {
            let model = fit_logistic(black_box(&x), black_box(&matrix.y), 1.0, 50, 1e-8);
            black_box(model.iterations);
        })
    });
    group.finish();
}

fn bench_isotonic_fit(c: &mut Criterion) {
    let raw: Vec<f64> = (0..5_000).map(|i| f64::from(i * 7919 % 5_000) / 5_000.0).collect();
    let labels: Vec<u8> = raw
        .iter()
        .enumerate()
        .map(|(i, p)| u8::from((i % 10) as f64 / 10.0 < *p))
        .collect();

    c.bench_function("isotonic_fit", |b| {
        b.iter(|| {
            let map = IsotonicMap::fit(black_box(&raw), black_box(&labels));
            black_box(map.apply(0.42));
        })
    });
}

fn bench_fixtures_parse(c: &mut Criterion) {
    c.bench_function("fixtures_parse", |b| {
        b.iter(|| {
            let games = parse_fixtures_json(black_box(FIXTURES_JSON)).unwrap();
            black_box(games.len());
        })
    });
}

criterion_group!(
    benches,
    bench_ingest,
    bench_rating_replay,
    bench_feature_engineering,
    bench_dataset_build,
    bench_logistic_fit,
    bench_isotonic_fit,
    bench_fixtures_parse
);
criterion_main!(benches);

const FIXTURES_JSON: &str = r#"{
  "games": [
    {"game_id": 2024020001, "date": "2024-10-08", "start_time": "2024-10-08T19:00:00", "home": "TOR", "away": "MTL", "home_goalie": "TOR-G1", "away_goalie": "MTL-G1"},
    {"game_id": 2024020002, "date": "2024-10-08", "start_time": "2024-10-08T19:30:00", "home": "BOS", "away": "FLA"},
    {"game_id": 2024020003, "date": "2024-10-08", "start_time": "2024-10-08T22:00:00", "home": "VGK", "away": "COL", "home_goalie": "VGK-G2"},
    {"game_id": 2024020004, "date": "2024-10-09", "home": "NYR", "away": "PIT"},
    {"game_id": 2024020005, "date": "2024-10-09", "home": "EDM", "away": "WPG", "away_goalie": "WPG-G1"}
  ]
}"#;
