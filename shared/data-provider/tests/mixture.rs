use std::{collections::HashSet, sync::Arc};

use admix_core::ShardInfo;
use admix_data_provider::{
    get_dataset, record, ConfigurationError, DataSource, DatasetOptions, DatasetProvider,
    FeatureConverter, InMemoryDataSource, Mixture, PadTrimConverter, Preprocessor, Provider,
    Record, RecordSource, SequenceLengths, Task, Value,
};
use anyhow::Result;
use approx::assert_relative_eq;
use pretty_assertions::assert_eq;
use rand::Rng;
use test_log::test;

fn task(name: &str, num_records: usize) -> Arc<Task> {
    task_with(name, num_records, vec![])
}

fn task_with(name: &str, num_records: usize, preprocessors: Vec<Preprocessor>) -> Arc<Task> {
    let records = (0..num_records)
        .map(|i| {
            let mut r = record([("id", i as i64)]);
            r.insert("task".into(), Value::Text(name.to_owned()));
            r.insert("tokens".into(), Value::Tokens(vec![i as i32; 3]));
            r
        })
        .collect();
    let source: Arc<dyn DataSource> =
        Arc::new(InMemoryDataSource::from_records("train", records));
    Arc::new(Task::new(name, source, preprocessors))
}

fn noise() -> Preprocessor {
    Preprocessor::random_map("noise", |mut r, rng| {
        r.insert("noise".into(), Value::Int(rng.gen_range(0..i64::MAX)));
        Ok(r)
    })
}

fn read(provider: &dyn DatasetProvider, options: &DatasetOptions) -> Vec<Record> {
    provider
        .get_dataset(options, None)
        .unwrap()
        .collect::<Result<_>>()
        .unwrap()
}

fn keys(records: &[Record]) -> Vec<(String, i64)> {
    records
        .iter()
        .map(|r| {
            (
                r["task"].as_text().unwrap().to_owned(),
                r["id"].as_int().unwrap(),
            )
        })
        .collect()
}

fn unshuffled() -> DatasetOptions {
    DatasetOptions::default().with_shuffle(false)
}

#[test]
fn direct_proportions_are_raw_weights() {
    let (a, b) = (task("a", 4), task("b", 4));
    let m = Mixture::new("m", vec![a.clone().into(), b.clone().into()], vec![0.3, 1.2]).unwrap();
    assert_relative_eq!(m.get_proportion(&a), 0.3);
    assert_relative_eq!(m.get_proportion(&b), 1.2);
    assert_relative_eq!(m.total_proportion(), 1.5);
    assert_relative_eq!(m.get_proportion(&task("c", 4)), 0.0);
}

#[test]
fn nested_proportions_are_normalized_per_level() {
    let (a, b, c) = (task("a", 4), task("b", 4), task("c", 4));
    let n = Mixture::new("n", vec![b.clone().into(), c.clone().into()], vec![3.0, 1.0]).unwrap();
    let m = Mixture::new("m", vec![n.into(), a.clone().into()], vec![2.0, 1.0]).unwrap();
    assert_relative_eq!(m.get_proportion(&b), 2.0 * 3.0 / 4.0);
    assert_relative_eq!(m.get_proportion(&c), 2.0 * 1.0 / 4.0);
    assert_relative_eq!(m.get_proportion(&a), 1.0);
}

#[test]
fn deeply_nested_proportions() {
    let (a, b) = (task("a", 4), task("b", 4));
    let inner = Mixture::new("inner", vec![a.clone().into(), b.clone().into()], vec![1.0, 3.0])
        .unwrap();
    let middle = Mixture::new("middle", vec![inner.into()], vec![5.0]).unwrap();
    let outer = Mixture::new("outer", vec![middle.into()], vec![2.0]).unwrap();
    assert_relative_eq!(outer.get_proportion(&a), 2.0 * 0.25);
    assert_relative_eq!(outer.get_proportion(&b), 2.0 * 0.75);
}

#[test]
fn leaf_tasks_are_sorted_deduplicated_and_stable() {
    let (a, b, c) = (task("a", 1), task("b", 1), task("c", 1));
    let n1 = Mixture::new("n1", vec![c.into(), a.clone().into()], vec![1.0, 1.0]).unwrap();
    let n2 = Mixture::new("n2", vec![a.into(), b.into()], vec![1.0, 1.0]).unwrap();
    let m = Mixture::new("m", vec![n2.into(), n1.into()], vec![1.0, 1.0]).unwrap();
    let names = |m: &Mixture| -> Vec<String> {
        m.leaf_tasks().iter().map(|t| t.name().to_owned()).collect()
    };
    assert_eq!(names(&m), vec!["a", "b", "c"]);
    assert_eq!(names(&m), names(&m));
}

#[test]
fn same_name_tasks_are_distinct_leaves() {
    let (first, second) = (task("a", 1), task("a", 1));
    let m = Mixture::new("m", vec![first.into(), second.into()], vec![1.0, 1.0]).unwrap();
    assert_eq!(m.leaf_tasks().len(), 2);
}

#[test]
fn mismatched_proportions_are_rejected() {
    let err = Mixture::new("m", vec![task("t1", 1).into(), task("t2", 1).into()], vec![0.5])
        .unwrap_err();
    assert_eq!(
        err,
        ConfigurationError::MismatchedProportions {
            mixture: "m".into(),
            tasks: 2,
            proportions: 1,
        }
    );
}

#[test]
fn duplicate_component_is_rejected() {
    let t = task("t", 1);
    let err = Mixture::new("m", vec![t.clone().into(), t.into()], vec![1.0, 1.0]).unwrap_err();
    assert!(matches!(err, ConfigurationError::DuplicateComponent { .. }));
}

#[test]
fn unbounded_shuffled_mixture_is_rejected() {
    let m = Mixture::new("m", vec![task("a", 2).into()], vec![1.0]).unwrap();
    let options = DatasetOptions::default()
        .with_num_epochs(None)
        .with_shuffle(true);
    let err = m.get_lazy_dataset(&options, None).err().unwrap();
    assert_eq!(
        err.as_configuration(),
        Some(&ConfigurationError::InfiniteShuffle {
            mixture: "m".into()
        })
    );
    assert!(m.get_dataset(&options, None).is_err());
}

#[test]
fn identical_configuration_gives_identical_records() {
    let b = task_with("b", 30, vec![noise()]);
    let inner = Mixture::new("inner", vec![b.into(), task("c", 20).into()], vec![1.0, 2.0]).unwrap();
    let a = task_with("a", 25, vec![noise()]);
    let m = Mixture::new("m", vec![a.into(), inner.into()], vec![1.0, 1.0]).unwrap();
    let options = DatasetOptions::default()
        .with_seed(Some(1234))
        .with_num_epochs(Some(3));
    let first = read(&m, &options);
    let second = read(&m, &options);
    assert!(!first.is_empty());
    assert_eq!(first, second);

    let reseeded = read(&m, &options.clone().with_seed(Some(4321)));
    assert_ne!(first, reseeded);
}

#[test]
fn mixing_stops_before_any_task_repeats() {
    let m = Mixture::new("m", vec![task("a", 10).into(), task("b", 100).into()], vec![1.0, 1.0])
        .unwrap();
    let records = read(&m, &unshuffled());
    let keys = keys(&records);
    let unique: HashSet<_> = keys.iter().cloned().collect();
    assert_eq!(unique.len(), keys.len());
    assert_eq!(keys.iter().filter(|(t, _)| t == "a").count(), 10);
    assert_eq!(records.len(), 20);
}

#[derive(Debug)]
struct CountingSource(usize);

impl RecordSource for CountingSource {
    fn len(&self) -> usize {
        self.0
    }

    fn get(&self, index: usize) -> Result<Record> {
        let mut r = record([("id", index as i64)]);
        r.insert("task".into(), Value::Text("huge".into()));
        Ok(r)
    }
}

impl DataSource for CountingSource {
    fn splits(&self) -> Vec<String> {
        vec!["train".into()]
    }

    fn num_input_examples(&self, _split: &str) -> Result<Option<usize>> {
        Ok(Some(self.0))
    }

    fn get_data_source(&self, _split: &str) -> Result<Arc<dyn RecordSource>> {
        Ok(Arc::new(CountingSource(self.0)))
    }
}

#[test]
fn huge_task_mixes_lazily_with_a_small_one() {
    let huge = Arc::new(Task::new("huge", Arc::new(CountingSource(1 << 61)), vec![]));
    let m = Mixture::new("m", vec![task("a", 4).into(), huge.into()], vec![1.0, 1.0]).unwrap();
    let records = read(&m, &unshuffled());
    assert_eq!(
        keys(&records),
        vec![
            ("a".to_owned(), 0),
            ("huge".to_owned(), 0),
            ("a".to_owned(), 1),
            ("huge".to_owned(), 1),
            ("a".to_owned(), 2),
            ("huge".to_owned(), 2),
            ("a".to_owned(), 3),
            ("huge".to_owned(), 3),
        ]
    );
}

#[test]
fn mixed_counts_follow_resolved_proportions() {
    let n = Mixture::new("n", vec![task("b", 1000).into(), task("c", 1000).into()], vec![3.0, 1.0])
        .unwrap();
    let m = Mixture::new("m", vec![n.into(), task("a", 1000).into()], vec![2.0, 1.0]).unwrap();
    let records = read(&m, &unshuffled());
    let count = |name: &str| keys(&records).iter().filter(|(t, _)| t == name).count();
    // b holds half of the mix and runs out first
    assert_eq!(count("b"), 1000);
    assert!((665..=668).contains(&count("a")), "{}", count("a"));
    assert!((332..=335).contains(&count("c")), "{}", count("c"));
}

#[test]
fn shards_are_disjoint_and_cover_the_sources() {
    let m = Mixture::new("m", vec![task("a", 8).into(), task("b", 8).into()], vec![1.0, 1.0])
        .unwrap();
    let mut seen = HashSet::new();
    for index in 0..2 {
        let options = DatasetOptions::default()
            .with_seed(Some(9))
            .with_shard_info(Some(ShardInfo::new(index, 2).unwrap()));
        for key in keys(&read(&m, &options)) {
            assert!(seen.insert(key.clone()), "{key:?} read by two shards");
        }
    }
    assert_eq!(seen.len(), 16);
}

#[test]
fn epochs_draw_fresh_randomness() {
    let m = Mixture::new("m", vec![task_with("a", 5, vec![noise()]).into()], vec![1.0]).unwrap();
    let records = read(&m, &unshuffled().with_num_epochs(Some(2)));
    assert_eq!(records.len(), 10);
    for i in 0..5 {
        assert_eq!(records[i]["id"], records[i + 5]["id"]);
        assert_ne!(records[i]["noise"], records[i + 5]["noise"]);
    }
}

#[test]
fn epochs_shuffle_independently() {
    let m = Mixture::new("m", vec![task("a", 40).into()], vec![1.0]).unwrap();
    let records = read(&m, &DatasetOptions::default().with_num_epochs(Some(2)));
    let ids: Vec<i64> = keys(&records).into_iter().map(|(_, id)| id).collect();
    let (first, second) = ids.split_at(40);
    assert_ne!(first, second);
    let mut sorted = first.to_vec();
    sorted.sort();
    assert_eq!(sorted, (0..40).collect::<Vec<_>>());
}

#[test]
fn unbounded_epochs_repeat_the_mix() {
    let m = Mixture::new("m", vec![task("a", 3).into(), task("b", 3).into()], vec![1.0, 1.0])
        .unwrap();
    let options = unshuffled().with_num_epochs(None);
    let records: Vec<Record> = m
        .get_dataset(&options, None)
        .unwrap()
        .take(18)
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(records[..6], records[6..12]);
    assert_eq!(records[..6], records[12..]);
}

#[derive(Debug)]
struct NoiseConverter;

impl FeatureConverter for NoiseConverter {
    fn get_transforms(&self, _: Option<&SequenceLengths>) -> Vec<Preprocessor> {
        vec![noise()]
    }
}

#[test]
fn post_mix_randomness_is_not_reproducible() {
    let m = Mixture::new("m", vec![task("a", 32).into(), task("b", 32).into()], vec![1.0, 1.0])
        .unwrap();
    let options = DatasetOptions::default().with_seed(Some(7));
    let noise_of = || -> Vec<Value> {
        m.get_dataset(&options, Some(&NoiseConverter))
            .unwrap()
            .map(|r| r.unwrap()["noise"].clone())
            .collect()
    };
    // same seed, same order of records, different post-mix draws
    assert_eq!(read(&m, &options), read(&m, &options));
    assert_ne!(noise_of(), noise_of());
}

#[test]
fn post_mix_feature_conversion_and_batching() {
    let m = Mixture::new("m", vec![task("a", 3).into(), task("b", 2).into()], vec![1.0, 1.0])
        .unwrap();
    let options = unshuffled()
        .with_batch_size(Some(3))
        .with_sequence_lengths(Some(SequenceLengths::from([("tokens".to_owned(), 5)])));
    let batches: Vec<Record> = m
        .get_dataset(&options, Some(&PadTrimConverter::new(-1)))
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    // a, b, a, b, a, then b would repeat: batches of 3 and 2
    assert_eq!(batches.len(), 2);
    let tokens = batches[0]["tokens"].as_list().unwrap();
    assert_eq!(tokens.len(), 3);
    assert_eq!(tokens[0], Value::Tokens(vec![0, 0, 0, -1, -1]));
    assert_eq!(batches[1]["id"].as_list().unwrap().len(), 2);
}

#[test]
fn top_level_dispatch_matches_direct_calls() {
    let t = task("a", 6);
    let m = Arc::new(Mixture::new("m", vec![t.clone().into()], vec![1.0]).unwrap());
    let options = DatasetOptions::default().with_seed(Some(3));
    let via_task: Vec<Record> = get_dataset(&Provider::from(t.clone()), &options, None)
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(via_task, read(t.as_ref(), &options));
    let via_mixture: Vec<Record> = get_dataset(&Provider::from(m.clone()), &options, None)
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(via_mixture, read(m.as_ref(), &options));
    assert_eq!(Provider::from(m).name(), "m");
}
