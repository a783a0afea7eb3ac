// Export OpenAPI specification as JSON
//
// Usage: cargo run --bin export-openapi > docs/openapi.json

use coderunner_control_plane::openapi::ApiDoc;

fn main() {
    println!("{}", ApiDoc::to_json());
}
