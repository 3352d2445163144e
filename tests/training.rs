//! End-to-end training behavior: loss bookkeeping, class conditioning,
//! determinism under a fixed seed, and weight persistence.

use latente::prelude::*;

fn small_config(seed: u64) -> VaeConfig {
    VaeConfig::new()
        .hidden_encoder(16)
        .hidden_decoder(16)
        .batch_size(8)
        .seed(seed)
}

/// Blob of bright pixels at a per-sample offset, so there is structure
/// for the models to learn.
fn blob_stack(n: usize, h: usize, w: usize) -> Tensor {
    let mut data = vec![0.0f32; n * h * w];
    for s in 0..n {
        let cy = 2 + s % (h - 4);
        let cx = 2 + (s * 3) % (w - 4);
        for dy in 0..2 {
            for dx in 0..2 {
                data[s * h * w + (cy + dy) * w + cx + dx] = 1.0;
            }
        }
    }
    Tensor::from_vec(data, &[n, h, w])
}

#[test]
fn fit_appends_one_loss_per_cycle() {
    let mut vae = Vae::new((8, 8), 2, small_config(0)).unwrap();
    let data = blob_stack(24, 8, 8);
    vae.fit(&data, 3).unwrap();
    assert_eq!(vae.loss_history().len(), 3);

    // a second call extends rather than resets the history
    vae.fit(&data, 2).unwrap();
    assert_eq!(vae.loss_history().len(), 5);
    assert!(vae.loss_history().iter().all(|l| l.is_finite()));
}

#[test]
fn fit_reduces_loss_on_structured_data() {
    let mut vae = Vae::new((8, 8), 2, small_config(1).learning_rate(5e-3)).unwrap();
    let data = blob_stack(32, 8, 8);
    vae.fit(&data, 30).unwrap();
    let history = vae.loss_history();
    assert!(
        history[history.len() - 1] < history[0],
        "loss should drop: {:?}",
        history
    );
}

#[test]
fn empty_data_stack_is_an_error() {
    let mut vae = Vae::new((8, 8), 2, small_config(10)).unwrap();
    assert!(vae.fit(&Tensor::zeros(&[0, 8, 8]), 1).is_err());
    assert!(vae.loss_history().is_empty());
}

#[test]
fn zero_training_cycles_is_an_error() {
    let data = blob_stack(8, 8, 8);

    let mut vae = Vae::new((8, 8), 2, small_config(2)).unwrap();
    assert!(vae.fit(&data, 0).is_err());

    let mut jrvae = JrVae::new((8, 8), 2, vec![3], false, small_config(2)).unwrap();
    assert!(jrvae.fit(&data, 0).is_err());
}

#[test]
fn conditioned_vae_requires_labels() {
    let data = blob_stack(12, 8, 8);
    let mut vae = Vae::new((8, 8), 2, small_config(3).num_classes(3)).unwrap();

    // unlabelled fit is rejected
    assert!(vae.fit(&data, 1).is_err());

    let labels: Vec<usize> = (0..12).map(|i| i % 3).collect();
    vae.fit_labelled(&data, &labels, 1).unwrap();

    // decode needs a label too
    assert!(vae.decode(&Tensor::zeros(&[1, 2]), None).is_err());
    let img = vae.decode(&Tensor::zeros(&[1, 2]), Some(1)).unwrap();
    assert_eq!(img.shape(), &[1, 8, 8]);
    assert!(vae.decode(&Tensor::zeros(&[1, 2]), Some(3)).is_err());
}

#[test]
fn unconditioned_models_reject_labels() {
    let vae = Vae::new((8, 8), 2, small_config(4)).unwrap();
    let err = vae.decode(&Tensor::zeros(&[1, 2]), Some(0)).unwrap_err();
    assert!(matches!(
        err,
        LatenteError::UnexpectedClassLabel { label: 0 }
    ));
}

#[test]
fn seeded_models_encode_identically() {
    let data = blob_stack(16, 8, 8);

    let build = || {
        let mut vae = Vae::new((8, 8), 2, small_config(42)).unwrap();
        vae.fit(&data, 2).unwrap();
        vae
    };
    let a = build();
    let b = build();
    assert_eq!(a.loss_history(), b.loss_history());

    let (mu_a, _) = a.encode(&data).unwrap();
    let (mu_b, _) = b.encode(&data).unwrap();
    assert_eq!(mu_a.data(), mu_b.data());
}

#[test]
fn saved_weights_restore_the_posterior() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vae.json");
    let data = blob_stack(16, 8, 8);

    let mut vae = Vae::new((8, 8), 2, small_config(5)).unwrap();
    vae.fit(&data, 2).unwrap();
    let (mu_before, _) = vae.encode(&data).unwrap();
    vae.save_weights(&path).unwrap();

    // fresh model with a different seed converges to the saved state
    let mut restored = Vae::new((8, 8), 2, small_config(99)).unwrap();
    restored.load_weights(&path).unwrap();
    let (mu_after, _) = restored.encode(&data).unwrap();
    assert_eq!(mu_before.data(), mu_after.data());
}

#[test]
fn rvae_weights_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rvae.json");
    let data = blob_stack(16, 8, 8);

    let mut rvae = RVae::new((8, 8), 2, true, small_config(6)).unwrap();
    rvae.fit(&data, 1).unwrap();
    let (mu_before, _) = rvae.encode(&data).unwrap();
    rvae.save_weights(&path).unwrap();

    let mut restored = RVae::new((8, 8), 2, true, small_config(77)).unwrap();
    restored.load_weights(&path).unwrap();
    let (mu_after, _) = restored.encode(&data).unwrap();
    assert_eq!(mu_before.data(), mu_after.data());
}

#[test]
fn load_rejects_mismatched_architectures() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vae.json");

    let vae = Vae::new((8, 8), 2, small_config(7)).unwrap();
    vae.save_weights(&path).unwrap();

    let mut other = Vae::new((8, 8), 10, small_config(7)).unwrap();
    assert!(other.load_weights(&path).is_err());
}

#[test]
fn load_rejects_mismatched_backbone_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vae.json");

    let vae = Vae::new((8, 8), 2, small_config(11)).unwrap();
    vae.save_weights(&path).unwrap();

    // checkpoints carry the config, so a conv model refuses fc weights
    let conv = small_config(11).conv_encoder(true).conv_decoder(true);
    let mut other = Vae::new((8, 8), 2, conv).unwrap();
    assert!(other.load_weights(&path).is_err());
}

#[test]
fn conv_backbones_train_to_a_finite_loss() {
    let config = small_config(9)
        .conv_encoder(true)
        .conv_decoder(true)
        .batch_size(4);
    let mut vae = Vae::new((8, 8), 2, config).unwrap();
    let data = blob_stack(8, 8, 8);

    vae.fit(&data, 1).unwrap();
    assert_eq!(vae.loss_history().len(), 1);
    assert!(vae.loss_history()[0].is_finite());

    let recon = vae.reconstruct(&data, 1).unwrap();
    assert_eq!(recon.shape(), &[8, 8, 8]);
}

#[test]
fn joint_models_train_with_gumbel_relaxation() {
    let data = blob_stack(24, 8, 8);

    let mut jvae = JVae::new((8, 8), 2, vec![3], small_config(8)).unwrap();
    jvae.fit(&data, 2).unwrap();
    assert!(jvae.loss_history().iter().all(|l| l.is_finite()));

    let mut jrvae = JrVae::new((8, 8), 2, vec![3], true, small_config(8)).unwrap();
    jrvae.fit(&data, 2).unwrap();
    assert!(jrvae.loss_history().iter().all(|l| l.is_finite()));
}
