#![no_main]

use cirp_retry::{RetryStrategyConfig, RetryStrategyType, calculate_delay};
use libfuzzer_sys::fuzz_target;
use std::time::Duration;

fuzz_target!(|data: (u32, u8, u64, u64, u8)| {
    let (attempt, strategy_type, base_ms, max_ms, jitter_byte) = data;

    let attempt = attempt % 100 + 1;
    let strategy = match strategy_type % 4 {
        0 => RetryStrategyType::Immediate,
        1 => RetryStrategyType::Exponential,
        2 => RetryStrategyType::Linear,
        _ => RetryStrategyType::Constant,
    };
    let base_delay = Duration::from_millis(base_ms % 10_000 + 1);
    let max_delay = Duration::from_millis(max_ms % 300_000 + 100);
    let jitter = f64::from(jitter_byte) / 255.0;

    let config = RetryStrategyConfig {
        strategy,
        max_attempts: 100,
        base_delay,
        max_delay,
        jitter,
    };

    let delay = calculate_delay(&config, attempt);

    if strategy == RetryStrategyType::Immediate {
        assert_eq!(delay, Duration::ZERO);
    } else {
        let ceiling = max_delay.mul_f64(1.0 + jitter) + Duration::from_millis(1);
        assert!(delay <= ceiling);
    }
});
