use std::path::Path;

use insurance_etl::manifest::yaml::YAML_CONFIG_NAME;

use crate::console::print_error_message;

pub fn manifest_exists(project_path: &Path) -> bool {
    project_path.join(YAML_CONFIG_NAME).is_file()
}

pub fn validate_manifest_exists(project_path: &Path) -> Result<(), String> {
    if manifest_exists(project_path) {
        return Ok(());
    }

    let message = format!(
        "{} does not exist in {}. Please use insurance-etl init to create a new project.",
        YAML_CONFIG_NAME,
        project_path.display()
    );
    print_error_message(&message);
    Err(message)
}
