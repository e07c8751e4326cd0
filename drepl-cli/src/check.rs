use drepl::file::DreplFile;

pub fn exec_check(file: &DreplFile) -> anyhow::Result<()> {
    let graph = file.graph();
    print!("{graph}");
    println!(
        "\n{} views, {} variables, {} blocks",
        graph.num_views(),
        graph.variables().len(),
        graph.num_blocks()
    );
    Ok(())
}
