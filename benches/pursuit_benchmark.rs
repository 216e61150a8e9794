//! Benchmark for the log-frequency pursuit and dictionary learning
//!
//! Times the two expensive stages of a separation on synthetic mixtures of
//! growing length:
//! 1. Log-frequency pursuit (one pass over every frame)
//! 2. Dictionary learning (cost driven by `runs`, not by the signal length)

use dictsep::{
    FrequencyRange, LearnParams, PursuitParams, SeparationConfig, ToneComponent, compound_tone,
    learn_spect_dict, logspect_pursuit, mix, sine_wave,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::time::{Duration, Instant};

const SAMPLE_RATE: u32 = 22050;

/// Two harmonic instruments playing one note each
fn generate_mixture(duration: Duration) -> Vec<f64> {
    let first = compound_tone(
        &[
            ToneComponent::new(220.0, 0.5),
            ToneComponent::new(440.0, 0.25),
            ToneComponent::new(660.0, 0.12),
        ],
        duration,
        SAMPLE_RATE,
    );
    let second = sine_wave(1250.0, duration, SAMPLE_RATE, 0.3);
    mix(&[first, second])
}

fn config() -> SeparationConfig {
    SeparationConfig {
        spectheight: 2048,
        logspectheight: 512,
        maxfreq: 10240.0,
        runs: 2000,
        ..SeparationConfig::new()
    }
}

fn report(label: &str, times: &mut [f64]) {
    times.sort_by(f64::total_cmp);
    let mean = times.iter().sum::<f64>() / times.len() as f64;
    let median = times[times.len() / 2];
    println!(
        "{label}: {:.2}ms ± {:.2}ms (median: {:.2}ms, range: {:.2}-{:.2}ms)",
        mean,
        (times.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / times.len() as f64).sqrt(),
        median,
        times[0],
        times[times.len() - 1]
    );
}

fn benchmark_pursuit(seconds: f64) {
    let config = config();
    let signal = generate_mixture(Duration::from_secs_f64(seconds));
    let spect = config.spect_params();
    let range = config.frequency_range(SAMPLE_RATE);
    let pursuit: PursuitParams = config.pursuit_params();

    println!(
        "Pursuit on {:.1}s mixture, {} frames",
        seconds,
        spect.num_frames(signal.len())
    );

    let mut times = Vec::new();
    for _ in 0..5 {
        let start = Instant::now();
        let result = logspect_pursuit(&signal, &spect, &range, &pursuit);
        times.push(start.elapsed().as_secs_f64() * 1000.0);
        assert!(result.is_ok(), "Pursuit failed");
    }
    report("  pursuit", &mut times);
}

fn benchmark_learning(seconds: f64) {
    let config = config();
    let signal = generate_mixture(Duration::from_secs_f64(seconds));
    let range: FrequencyRange = config.frequency_range(SAMPLE_RATE);
    let learn: LearnParams = config.learn_params();
    let Ok((logspect, _)) = logspect_pursuit(
        &signal,
        &config.spect_params(),
        &range,
        &config.pursuit_params(),
    ) else {
        println!("  pursuit failed, skipping learning");
        return;
    };

    println!("Learning {} groups over {} runs", learn.group_count(), learn.runs);

    let mut times = Vec::new();
    for seed in 0..3 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let start = Instant::now();
        let result = learn_spect_dict(&logspect, config.fsigma(), &learn, &range, &mut rng);
        times.push(start.elapsed().as_secs_f64() * 1000.0);
        assert!(result.is_ok(), "Learning failed");
    }
    report("  learning", &mut times);
}

fn main() {
    println!("dictsep pursuit and learning benchmark");
    println!("======================================");

    if cfg!(feature = "parallel-processing") {
        println!("Per-frame parallelism: enabled");
    } else {
        println!("Per-frame parallelism: disabled");
    }
    println!();

    for seconds in [0.5, 2.0, 10.0] {
        benchmark_pursuit(seconds);
    }
    println!();
    benchmark_learning(2.0);
}
