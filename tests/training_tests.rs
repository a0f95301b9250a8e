use blobnet::{Blob, Dataset, NetConfig, NetError, Network, ParamSlot, Shape, Trainer};
use std::path::PathBuf;

/// Class 0 lights the left half of a 4x4 image, class 1 the right half
fn halves(n: usize) -> (Blob, Blob) {
    let mut x = Blob::zeros(Shape::new(n, 1, 4, 4));
    let mut y = Blob::zeros(Shape::new(n, 2, 1, 1));
    for i in 0..n {
        let class = i % 2;
        let strength = 0.5 + (i % 5) as f64 * 0.1;
        for h in 0..4 {
            for w in 0..4 {
                let lit = (w < 2) == (class == 0);
                x.set(i, 0, h, w, if lit { strength } else { -0.1 * strength });
            }
        }
        y.set(i, class, 0, 0, 1.0);
    }
    (x, y)
}

fn config(method: &str) -> NetConfig {
    let json = format!(
        r#"{{
            "train": {{
                "learning rate": 0.05, "update method": "{}", "batch size": 8,
                "epochs": 15, "acc frequence": 5, "seed": 17
            }},
            "net": [
                {{"name": "conv1", "type": "Conv", "kernel num": 2, "kernel height": 3,
                  "kernel width": 3, "pad": 1, "stride": 1, "conv weight init": "msra"}},
                {{"name": "relu1", "type": "ReLU"}},
                {{"name": "pool1", "type": "Pool", "kernel height": 2, "kernel width": 2, "stride": 2}},
                {{"name": "fc1", "type": "FC", "kernel num": 2, "fc weight init": "msra"}},
                {{"name": "loss", "type": "Softmax"}}
            ]
        }}"#,
        method
    );
    NetConfig::from_json_str(&json).unwrap()
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(name);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_training_reduces_loss_for_every_method() {
    let (x, y) = halves(40);
    let data = Dataset::split(&x, &y, 0.25).unwrap();

    for (method, lr) in [("sgd", 0.1), ("momentum", 0.05), ("rmsprop", 0.01)] {
        let mut config = config(method);
        config.train.learning_rate = lr;
        let mut net = Network::from_config(&config, data.sample_shape()).unwrap();
        let before = net.evaluate(&data.train_x, &data.train_y).unwrap();

        let ctx = Trainer::new(&config.train).unwrap().run(&mut net, &data).unwrap();
        let after = net.evaluate(&data.train_x, &data.train_y).unwrap();

        assert_eq!(ctx.iteration, 30 / 8 * 15);
        assert!(
            after.loss < before.loss,
            "{}: loss went from {} to {}",
            method,
            before.loss,
            after.loss
        );
        assert!(ctx.val_eval.is_some());
        assert!(ctx.best_val_loss.is_finite());
    }
}

#[test]
fn test_learning_rate_decays_every_iteration() {
    let (x, y) = halves(16);
    let data = Dataset::split(&x, &y, 0.25).unwrap();
    let mut config = config("sgd");
    config.train.lr_decay = 0.5;
    config.train.update_lr = true;
    config.train.epochs = 1;
    let mut net = Network::from_config(&config, data.sample_shape()).unwrap();
    let ctx = Trainer::new(&config.train).unwrap().run(&mut net, &data).unwrap();
    // 12 samples, batch 8: one iteration
    assert_eq!(ctx.iteration, 1);
    assert!((ctx.learning_rate - 0.025).abs() < 1e-15);
}

#[test]
fn test_same_seed_same_run() {
    let (x, y) = halves(24);
    let data = Dataset::split(&x, &y, 0.25).unwrap();
    let mut config = config("momentum");
    config.train.epochs = 3;

    let mut a = Network::from_config(&config, data.sample_shape()).unwrap();
    let mut b = Network::from_config(&config, data.sample_shape()).unwrap();
    let ctx_a = Trainer::new(&config.train).unwrap().run(&mut a, &data).unwrap();
    let ctx_b = Trainer::new(&config.train).unwrap().run(&mut b, &data).unwrap();
    assert_eq!(ctx_a, ctx_b);
    assert_eq!(a.snapshot(), b.snapshot());
}

#[test]
fn test_snapshots_written_and_fine_tune_restores_them() {
    let dir = temp_dir("blobnet_snapshot_test");
    let (x, y) = halves(40);
    let data = Dataset::split(&x, &y, 0.25).unwrap();
    let mut config = config("sgd");
    config.train.epochs = 2;
    config.train.snapshot = true;
    config.train.snapshot_interval = 3;
    config.train.checkpoint_dir = dir.clone();
    let mut net = Network::from_config(&config, data.sample_shape()).unwrap();
    let ctx = Trainer::new(&config.train).unwrap().run(&mut net, &data).unwrap();
    assert_eq!(ctx.iteration, 6);

    assert!(!dir.join("iter0.blobnet").exists());
    let snap = dir.join("iter3.blobnet");
    assert!(snap.exists());

    let mut reference = Network::from_config(&config, data.sample_shape()).unwrap();
    reference.load_weights(&snap).unwrap();

    let mut tune = config.clone();
    tune.train.fine_tune = true;
    tune.train.pre_trained_model = Some(snap.clone());
    tune.train.seed = 99;
    let tuned = Network::from_config(&tune, data.sample_shape()).unwrap();
    assert_eq!(tuned.snapshot(), reference.snapshot());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_missing_pretrained_model_keeps_fresh_weights() {
    let mut tune = config("sgd");
    tune.train.fine_tune = true;
    tune.train.pre_trained_model = Some(PathBuf::from("/nonexistent/blobnet/iter1.blobnet"));
    let tuned = Network::from_config(&tune, Shape::new(1, 1, 4, 4)).unwrap();
    let fresh = Network::from_config(&config("sgd"), Shape::new(1, 1, 4, 4)).unwrap();
    assert_eq!(tuned.snapshot(), fresh.snapshot());
}

#[test]
fn test_corrupt_pretrained_model_keeps_fresh_weights() {
    let dir = temp_dir("blobnet_corrupt_test");
    let path = dir.join("huge.blobnet");
    let mut bytes = b"BLOBNET_CKPT\x01".to_vec();
    bytes.extend_from_slice(&1u32.to_le_bytes());
    for s in ["fc1", "WEIGHT"] {
        bytes.extend_from_slice(&(s.len() as u32).to_le_bytes());
        bytes.extend_from_slice(s.as_bytes());
    }
    for _ in 0..4 {
        bytes.extend_from_slice(&65536u32.to_le_bytes());
    }
    bytes.extend_from_slice(&0u32.to_le_bytes());
    std::fs::write(&path, &bytes).unwrap();

    let mut tune = config("sgd");
    tune.train.fine_tune = true;
    tune.train.pre_trained_model = Some(path);
    let tuned = Network::from_config(&tune, Shape::new(1, 1, 4, 4)).unwrap();
    let fresh = Network::from_config(&config("sgd"), Shape::new(1, 1, 4, 4)).unwrap();
    assert_eq!(tuned.snapshot(), fresh.snapshot());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_restore_into_different_architecture_fails() {
    let dir = temp_dir("blobnet_mismatch_test");
    let path = dir.join("small.blobnet");
    let net = Network::from_config(&config("sgd"), Shape::new(1, 1, 4, 4)).unwrap();
    net.save_weights(&path).unwrap();

    // Wider input changes the fully connected weight shape
    let mut wide = Network::from_config(&config("sgd"), Shape::new(1, 1, 6, 6)).unwrap();
    let before = wide.params().value("fc1", ParamSlot::Weight).unwrap().clone();
    assert!(matches!(wide.load_weights(&path), Err(NetError::Checkpoint(_))));
    assert_eq!(wide.params().value("fc1", ParamSlot::Weight), Some(&before));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_oversized_batch_trains_nothing() {
    let (x, y) = halves(8);
    let data = Dataset::split(&x, &y, 0.5).unwrap();
    let config = config("sgd");
    let mut net = Network::from_config(&config, data.sample_shape()).unwrap();
    let before = net.snapshot();
    let ctx = Trainer::new(&config.train).unwrap().run(&mut net, &data).unwrap();
    assert_eq!(ctx.iteration, 0);
    assert_eq!(net.snapshot(), before);
}

#[test]
fn test_step_on_empty_training_set_is_an_error() {
    let (x, y) = halves(4);
    let data = Dataset::split(&x, &y, 1.0).unwrap();
    assert_eq!(data.train_len(), 0);
    let config = config("sgd");
    let mut net = Network::from_config(&config, data.sample_shape()).unwrap();
    let mut trainer = Trainer::new(&config.train).unwrap();
    let mut ctx = trainer.context();
    assert!(matches!(
        trainer.step(&mut net, &data, &mut ctx),
        Err(NetError::OutOfRange { len: 0, .. })
    ));
    assert_eq!(ctx.iteration, 0);
}
