//! The `adaptest init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("adaptest.toml").exists() {
        println!("adaptest.toml already exists, skipping.");
    } else {
        std::fs::write("adaptest.toml", SAMPLE_CONFIG)?;
        println!("Created adaptest.toml");
    }

    std::fs::create_dir_all("item-banks")?;
    let example_path = std::path::Path::new("item-banks/example.toml");
    if example_path.exists() {
        println!("item-banks/example.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, EXAMPLE_BANK)?;
        println!("Created item-banks/example.toml");
    }

    println!("\nNext steps:");
    println!("  1. Replace item-banks/example.toml with your calibrated items");
    println!("  2. Run: adaptest validate --bank item-banks/example.toml");
    println!("  3. Run: adaptest simulate --bank item-banks/example.toml --sessions 200");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# adaptest configuration

# seed = 42
output_dir = "./adaptest-results"

[estimator]
method = "eap"
quadrature_points = 61
theta_min = -4.0
theta_max = 4.0

[exposure]
baseline_sessions = 100
epoch_sessions = 200
min_k = 0.01
max_growth = 2.0

[session]
degradation = "administer_best"

[session.stopping]
max_items = 30
min_items = 5
se_threshold = 0.3
# time_limit_secs = 3600
# item_timeout_secs = 300

[session.content_quotas]
# algebra = 3

[bank]
min_active_items = 5
min_sample_size = 200

[simulation]
sessions = 500
parallelism = 4
theta_mean = 0.0
theta_sd = 1.0
"#;

const EXAMPLE_BANK: &str = r#"[calibration]
id = "0c9e8f2b-1d3a-4b6c-9e7f-2a5b8c1d4e6f"
sample_size = 800

[[items]]
id = "alg-001"
content_ref = "content://algebra/001"
a = 1.009
b = -2.482
c = 0.155
key = "D"
tags = ["algebra"]

[[items]]
id = "geo-002"
content_ref = "content://geometry/002"
a = 1.513
b = -2.34
c = 0.102
key = "D"
tags = ["geometry"]

[[items]]
id = "sta-003"
content_ref = "content://statistics/003"
a = 1.037
b = -1.94
c = 0.249
key = "D"
tags = ["statistics"]

[[items]]
id = "num-004"
content_ref = "content://number/004"
a = 1.403
b = -1.48
c = 0.16
key = "B"
tags = ["number"]

[[items]]
id = "alg-005"
content_ref = "content://algebra/005"
a = 1.001
b = -1.306
c = 0.239
key = "D"
tags = ["algebra"]

[[items]]
id = "geo-006"
content_ref = "content://geometry/006"
a = 1.664
b = -0.765
c = 0.11
key = "A"
tags = ["geometry"]

[[items]]
id = "sta-007"
content_ref = "content://statistics/007"
a = 1.092
b = -0.688
c = 0.23
key = "D"
tags = ["statistics"]

[[items]]
id = "num-008"
content_ref = "content://number/008"
a = 1.473
b = 0.001
c = 0.158
key = "D"
tags = ["number"]

[[items]]
id = "alg-009"
content_ref = "content://algebra/009"
a = 1.213
b = 0.287
c = 0.167
key = "B"
tags = ["algebra"]

[[items]]
id = "geo-010"
content_ref = "content://geometry/010"
a = 1.843
b = 0.339
c = 0.12
key = "B"
target_exposure = 0.25
tags = ["geometry"]

[[items]]
id = "sta-011"
content_ref = "content://statistics/011"
a = 1.035
b = 0.902
c = 0.217
key = "C"
tags = ["statistics"]

[[items]]
id = "num-012"
content_ref = "content://number/012"
a = 1.247
b = 1.3
c = 0.186
key = "D"
tags = ["number"]

[[items]]
id = "alg-013"
content_ref = "content://algebra/013"
a = 1.46
b = 1.662
c = 0.202
key = "A"
tags = ["algebra"]

[[items]]
id = "geo-014"
content_ref = "content://geometry/014"
a = 1.813
b = 2.03
c = 0.201
key = "B"
target_exposure = 0.25
tags = ["geometry"]

[[items]]
id = "sta-015"
content_ref = "content://statistics/015"
a = 1.608
b = 2.097
c = 0.181
key = "A"
tags = ["statistics"]

[[items]]
id = "num-016"
content_ref = "content://number/016"
a = 1.628
b = 2.384
c = 0.225
key = "C"
tags = ["number"]
"#;
