use image_prompt_runner::config::Config;
use image_prompt_runner::infrastructure::engine::{ActionTarget, AutomationEngine, EngineFactory, Locator};
use image_prompt_runner::infrastructure::ChromeFactory;
use image_prompt_runner::models::interaction_config::{elements, CaptureSize};
use image_prompt_runner::utils::logging;
use image_prompt_runner::{App, InteractionConfig};
use tempfile::tempdir;

#[tokio::test]
#[ignore] // 默认忽略，需要手动运行：cargo test -- --ignored
async fn test_launch_headless_browser() {
    let _ = logging::init(true, "run_log.txt");

    let profile = tempdir().unwrap();
    let factory = ChromeFactory {
        profile_root: profile.path().to_path_buf(),
        headless: true,
        target_url: "about:blank".to_string(),
        debug_port: None,
    };

    let engine = factory.open(0).await.expect("启动浏览器失败");
    engine
        .navigate("data:text/html,<textarea id=\"prompt\"></textarea>")
        .await
        .expect("导航失败");

    let textarea = ActionTarget::Structural(Locator::from_raw(&["#prompt"]));
    assert!(engine.is_present(&textarea).await.unwrap());

    let missing = ActionTarget::Structural(Locator::from_raw(&["#nope"]));
    assert!(!engine.is_present(&missing).await.unwrap());

    let shot = engine
        .capture_region(&textarea, CaptureSize { width: 64, height: 64 })
        .await
        .unwrap();
    assert!(!shot.is_empty());

    engine.close().await.unwrap();
    assert!(profile.path().join("worker-0").exists());
}

#[tokio::test]
#[ignore]
async fn test_connect_to_debug_browser() {
    let _ = logging::init(true, "run_log.txt");

    // 需要先启动: chrome --remote-debugging-port=9222
    let config = Config::from_env();
    let interaction = InteractionConfig::load(&config.config_path).unwrap();
    let factory = ChromeFactory {
        profile_root: interaction.browser_profile.clone(),
        headless: false,
        target_url: interaction.target_url.clone(),
        debug_port: Some(config.browser_debug_port.unwrap_or(9222)),
    };

    let engine = factory.open(0).await.expect("连接浏览器失败");
    let url = engine.current_url().await.unwrap();
    println!("当前页面: {:?}", url);
    assert!(url.is_some());

    let marker = interaction.element(elements::AUTH_MARKER).unwrap();
    println!("登录标记选择器: {:?}", marker.selectors);
    engine.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_process_dataset_with_real_browser() {
    let _ = logging::init(true, "run_log.txt");

    // 使用 INPUT_DIR / OUTPUT_DIR / CONFIG_PATH 环境变量指定的真实数据集
    let config = Config {
        concurrency: Some(1),
        max_items_per_worker: Some(1),
        ..Config::from_env()
    };
    let app = App::initialize(config).expect("初始化失败");
    let report = app.run().await.expect("运行失败");

    println!(
        "成功 {} / 失败 {} / 跳过 {}",
        report.stats.succeeded, report.stats.failed, report.stats.skipped
    );
    assert!(report.auth_failures.is_empty(), "worker 未登录");
}
