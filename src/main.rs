use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = clinic_cash_lib::diagnostics::get_data_dir();
    clinic_cash_lib::init_logging(&data_dir);

    clinic_cash_lib::run(&data_dir)
        .await
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("clinic backend failed (data dir {})", data_dir.display()))
}
