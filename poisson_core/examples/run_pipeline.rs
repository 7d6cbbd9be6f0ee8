//! Run the full pipeline end to end.
//!
//! Loads CIFAR-10 binary batches from the configured data root when present,
//! otherwise falls back to a synthetic dataset so the demo runs anywhere.
//! Pass a TOML config path as the first argument to override the defaults.
//!
//! ```text
//! cargo run --release --example run_pipeline -- pipeline.toml
//! ```

use std::error::Error;

use poisson_core::config::PipelineConfig;
use poisson_core::data::{generate_synthetic_dataset, load_cifar10_dir, SyntheticConfig};
use poisson_core::extractor::{evaluate_classifier, train_extractor, SupervisedExtractor};
use poisson_core::features::export_features;
use poisson_core::field::{integrate_split, train_field, FieldNetwork};
use poisson_core::logging::log_probe_result;
use poisson_core::{probe_representation, Checkpointable, ImageDataset};

fn load_datasets(config: &PipelineConfig) -> Result<(ImageDataset, ImageDataset), Box<dyn Error>> {
    match load_cifar10_dir(&config.data.root) {
        Ok(splits) => {
            println!("Loaded CIFAR-10 from {}", config.data.root.display());
            Ok(splits)
        }
        Err(err) => {
            println!(
                "No CIFAR-10 at {} ({err}); using a synthetic dataset",
                config.data.root.display()
            );
            let train = generate_synthetic_dataset(&SyntheticConfig {
                samples_per_class: 500,
                seed: 1,
                ..Default::default()
            });
            let test = generate_synthetic_dataset(&SyntheticConfig {
                samples_per_class: 100,
                seed: 2,
                ..Default::default()
            });
            Ok((train, test))
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            println!("Loading configuration from {path}");
            PipelineConfig::load_from_file(path)?
        }
        None => PipelineConfig::default(),
    };

    let (train, test) = load_datasets(&config)?;
    let (_, height, width) = train.image_shape();
    println!(
        "Train: {} images, test: {} images ({height}x{width})",
        train.len(),
        test.len()
    );

    // Stage 1: supervised extractor.
    println!("\n=== Training feature extractor ===");
    let mut extractor =
        SupervisedExtractor::new(&config.extractor, train.num_classes, (height, width));
    let result = train_extractor(
        &mut extractor,
        &train,
        &config.data,
        &config.extractor_training,
    )?;
    for metrics in &result.epochs {
        println!(
            "epoch {:>3}  loss {:.4}  accuracy {:.3}",
            metrics.epoch, metrics.avg_loss, metrics.accuracy
        );
    }
    let test_accuracy = evaluate_classifier(&mut extractor, &test, 256);
    println!("Classifier test accuracy: {test_accuracy:.3}");
    extractor.save_checkpoint("artifacts/extractor.bin")?;

    // Stage 2: embed both splits once.
    println!("\n=== Exporting features ===");
    let artifact = export_features(&mut extractor.net, &train, &test, 256);
    artifact.save_checkpoint("artifacts/features.bin")?;
    println!(
        "Exported {} train / {} test rows of width {}",
        artifact.train.len(),
        artifact.test.len(),
        artifact.feat_dim
    );

    // Stage 3: field network over the augmented embeddings.
    println!("\n=== Training field network ===");
    let mut field = FieldNetwork::new(&config.field, artifact.feat_dim);
    let field_result = train_field(&mut field, &artifact.train, &config.field_training)?;
    if let Some(loss) = field_result.final_loss() {
        println!("Final field loss: {loss:.5}");
    }
    field.save_checkpoint("artifacts/field.bin")?;

    // Stage 4: integrate and probe.
    println!("\n=== Integrating and probing ===");
    let flowed_train = integrate_split(&mut field, &artifact.train, &config.ode);
    let flowed_test = integrate_split(&mut field, &artifact.test, &config.ode);

    let raw = probe_representation(
        &artifact.train.data,
        &artifact.train.labels,
        &artifact.test.data,
        &artifact.test.labels,
        train.num_classes,
        &config.probe,
    );
    log_probe_result("raw", raw.train_accuracy, raw.test_accuracy)?;
    println!(
        "Raw embeddings:    train {:.3}  test {:.3}",
        raw.train_accuracy, raw.test_accuracy
    );

    let flowed = probe_representation(
        &flowed_train,
        &artifact.train.labels,
        &flowed_test,
        &artifact.test.labels,
        train.num_classes,
        &config.probe,
    );
    log_probe_result("flowed", flowed.train_accuracy, flowed.test_accuracy)?;
    println!(
        "Flowed embeddings: train {:.3}  test {:.3}",
        flowed.train_accuracy, flowed.test_accuracy
    );

    Ok(())
}
