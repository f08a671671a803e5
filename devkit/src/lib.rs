/*!
# Netwatch DevKit - Outils de test

Partagé par les tests unitaires et d'intégration du kernel :
- doublures scriptées de `ping` et `speedtest-cli` (simples scripts `sh`,
  pas besoin de réseau)
- répertoires temporaires pour stores sur disque et fichiers de config
- attente active et initialisation des logs
*/

pub mod scripted;
pub mod test_utils;

pub use scripted::{speedtest_report, ScriptedCommand, ScriptedPing};
pub use test_utils::{init_test_logging, wait_until, TempDataDir};
