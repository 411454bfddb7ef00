use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use mindlog_personid::{
    cosine_similarity, parse_suffix, Config, IdentityStore, ImageFaces, JsonFileBackend, Linkage,
    MemoryBackend, PersonIdError, StoreBackend, Tagger,
};

fn config() -> Config {
    Config {
        dim: 4,
        match_threshold: 0.75,
        cluster_threshold: 0.3,
        linkage: Linkage::Average,
        cluster_hint: false,
    }
}

fn file_tagger(path: &std::path::Path) -> Tagger {
    Tagger::new(config(), Box::new(JsonFileBackend::new(path).with_dim(4))).unwrap()
}

fn unit(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; 4];
    v[axis] = 1.0;
    v
}

#[test]
fn same_person_across_batches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("face_database.json");

    let first = file_tagger(&path)
        .tag(vec![ImageFaces::new("day1.jpg", vec![vec![1.0, 0.1, 0.0, 0.0]])])
        .unwrap();
    assert_eq!(first.tags_of("day1.jpg").unwrap(), ["person_1"]);

    // A new process: the tagger is rebuilt from the file.
    let second = file_tagger(&path)
        .tag(vec![ImageFaces::new("day2.jpg", vec![vec![0.95, 0.2, 0.05, 0.0]])])
        .unwrap();
    assert_eq!(second.tags_of("day2.jpg").unwrap(), ["person_1"]);
    assert!(second.created.is_empty());

    let store = JsonFileBackend::new(&path).load();
    let person = store.get("person_1").unwrap();
    assert_eq!(person.len(), 2);
    assert_eq!(person.images(), vec!["day1.jpg", "day2.jpg"]);
}

#[test]
fn different_people_across_batches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("face_database.json");
    let tagger = file_tagger(&path);

    let a = tagger.tag(vec![ImageFaces::new("a.jpg", vec![unit(0)])]).unwrap();
    let b = tagger.tag(vec![ImageFaces::new("b.jpg", vec![unit(1)])]).unwrap();
    assert_eq!(a.tags_of("a.jpg").unwrap(), ["person_1"]);
    assert_eq!(b.tags_of("b.jpg").unwrap(), ["person_2"]);
}

#[test]
fn known_person_scenario() {
    let known = vec![1.0, 0.0, 0.0, 0.0];
    // Similarity 0.95 to the known face.
    let probe = vec![0.95, (1.0f32 - 0.95 * 0.95).sqrt(), 0.0, 0.0];
    assert!((cosine_similarity(&known, &probe) - 0.95).abs() < 1e-5);

    let mut store = IdentityStore::new();
    store.create("known.jpg", known).unwrap();
    let backend = MemoryBackend::with_store(store);
    let tagger = Tagger::new(config(), Box::new(backend.clone())).unwrap();

    let result = tagger.tag(vec![ImageFaces::new("new.jpg", vec![probe])]).unwrap();
    assert_eq!(result.to_map()["new.jpg"], vec!["person_1"]);
    assert_eq!(backend.load().get("person_1").unwrap().len(), 2);
    assert_eq!(backend.saves(), 1);
}

#[test]
fn ids_strictly_increase_and_never_repeat() {
    let tagger = Tagger::with_memory_backend(config()).unwrap();
    let mut seen = HashSet::new();
    let mut max_suffix = 0;

    for batch in 0..4 {
        let faces = (0..4).map(|axis| {
            let mut v = unit(axis);
            // Odd batches bring new strangers, even batches revisit people.
            if batch % 2 == 1 {
                v[axis] = -1.0;
            }
            v[(axis + 1) % 4] = batch as f32 * 0.01;
            v
        });
        let images: Vec<ImageFaces> = faces
            .enumerate()
            .map(|(i, f)| ImageFaces::new(format!("b{batch}-{i}.jpg"), vec![f]))
            .collect();
        let result = tagger.tag(images).unwrap();

        let before = max_suffix;
        for id in &result.created {
            assert!(seen.insert(id.clone()), "{id} issued twice");
            let n = parse_suffix(id).unwrap();
            assert!(n > before, "{id} does not exceed previous max {before}");
            max_suffix = max_suffix.max(n);
        }
    }
    assert_eq!(seen.len(), 8);
    assert_eq!(tagger.snapshot().len(), seen.len());
}

#[test]
fn concurrent_batches_allocate_unique_ids() {
    let dir = tempfile::tempdir().unwrap();
    let tagger = Arc::new(file_tagger(&dir.path().join("face_database.json")));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let tagger = Arc::clone(&tagger);
            thread::spawn(move || {
                // Each thread brings a stranger nobody else has seen.
                let mut v = vec![0.0f32; 4];
                v[t % 4] = if t < 4 { 1.0 } else { -1.0 };
                tagger
                    .tag(vec![ImageFaces::new(format!("t{t}.jpg"), vec![v])])
                    .unwrap()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for h in handles {
        let result = h.join().unwrap();
        assert_eq!(result.created.len(), 1);
        assert!(ids.insert(result.created[0].clone()));
    }

    let store = tagger.snapshot();
    assert_eq!(store.len(), 8);
    assert_eq!(store.next_id(), 9);
}

#[test]
fn load_save_round_trip_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("face_database.json");
    let tagger = file_tagger(&path);
    tagger
        .tag(vec![
            ImageFaces::new("x.jpg", vec![vec![0.3, 0.1, 0.7, 0.2], vec![0.0, 1.0, 0.0, 0.1]]),
            ImageFaces::new("y.jpg", vec![vec![0.31, 0.12, 0.69, 0.2]]),
        ])
        .unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let mut backend = JsonFileBackend::new(&path).with_dim(4);
    let loaded = backend.load();
    backend.save(&loaded).unwrap();
    assert_eq!(backend.load(), loaded);
    assert_eq!(std::fs::read(&path).unwrap(), bytes);
}

#[test]
fn legacy_store_is_migrated_on_first_save() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("face_database.json");
    std::fs::write(
        &path,
        r#"{
    "person_1": {
        "embeddings": [[1.0, 0.0, 0.0, 0.0]],
        "image_paths": ["https://drive.google.com/uc?id=abc"]
    },
    "person_2": {
        "embeddings": [[0.0, 1.0, 0.0, 0.0]],
        "image_paths": ["https://drive.google.com/uc?id=def"]
    }
}"#,
    )
    .unwrap();

    let result = file_tagger(&path)
        .tag(vec![
            ImageFaces::new("old-friend.jpg", vec![vec![0.0, 0.98, 0.1, 0.0]]),
            ImageFaces::new("stranger.jpg", vec![vec![0.0, 0.0, 0.0, 1.0]]),
        ])
        .unwrap();
    assert_eq!(result.tags_of("old-friend.jpg").unwrap(), ["person_2"]);
    assert_eq!(result.tags_of("stranger.jpg").unwrap(), ["person_3"]);

    let doc: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(doc["version"], 1);
    assert_eq!(doc["next_id"], 4);
    assert_eq!(
        doc["identities"]["person_1"]["embeddings"][0]["image"],
        "https://drive.google.com/uc?id=abc"
    );
}

#[test]
fn corrupt_store_starts_over() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("face_database.json");
    std::fs::write(&path, "{\"person_1\": {\"embeddings\": [[1.0, 0.0").unwrap();

    let result = file_tagger(&path)
        .tag(vec![ImageFaces::new("a.jpg", vec![unit(2)])])
        .unwrap();
    assert_eq!(result.tags_of("a.jpg").unwrap(), ["person_1"]);
    assert_eq!(JsonFileBackend::new(&path).load().len(), 1);
}

#[test]
fn exhausted_counter_fails_batch_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("face_database.json");
    let doc = format!(
        r#"{{"version": 1, "next_id": {max}, "identities": {{
            "person_{max}": {{"embeddings": [{{"image": "a.jpg", "embedding": [1.0, 0.0, 0.0, 0.0]}}]}}
        }}}}"#,
        max = u64::MAX
    );
    std::fs::write(&path, &doc).unwrap();

    let store = JsonFileBackend::new(&path).load();
    assert_eq!(store.next_id(), u64::MAX);

    let tagger = file_tagger(&path);
    let err = tagger
        .tag(vec![ImageFaces::new("b.jpg", vec![unit(1)])])
        .unwrap_err();
    assert!(matches!(err, PersonIdError::IdSpaceExhausted));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), doc);

    // Known faces still match.
    let result = tagger
        .tag(vec![ImageFaces::new("c.jpg", vec![unit(0)])])
        .unwrap();
    assert_eq!(result.tags_of("c.jpg").unwrap(), [format!("person_{}", u64::MAX)]);
}
