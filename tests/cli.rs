use assert_cmd::Command;

#[test]
fn help() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("h8flash")?;

    cmd.arg("--help");
    cmd.assert().success();

    Ok(())
}

#[test]
fn image_is_required_unless_listing() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("h8flash")?;

    cmd.args(["--freq", "12.5"]);
    cmd.assert().failure();

    Ok(())
}

#[test]
fn invalid_usb_id() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("h8flash")?;

    // Fails while parsing the port, before any device is touched
    cmd.args(["--port", "usb:zzzz:0025", "--list"]);
    cmd.assert().failure();

    Ok(())
}
